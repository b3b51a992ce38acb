// =============================================================================
// LLM Decision Adapter — prompt construction, response parsing, fallback
// =============================================================================
//
// The adapter treats the LLM as a black-box `(systemPrompt, userPrompt) ->
// String` function (spec §6 "LLM contract"). Two implementations exist: the
// deterministic `HoldFallbackClient` (selected when `LLM_ENABLED` is unset)
// and `HttpLlmClient`, a thin `reqwest` POST client. Both implement the same
// `LlmClient` trait, following the teacher's pattern of putting an
// `async_trait` seam between the engine and its external collaborator.
//
// Never returns an error to its caller: every failure mode — timeout,
// malformed JSON, an HTTP error from the live client — degrades to a neutral
// HOLD proposal (spec §4.5, §7 "LLMError is adapter-internal only").
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Agent, Discussion, Message, Proposal, ProposalFields, Sector};
use crate::types::AgentRole;

/// A single agent turn: the analysis text plus the structured proposal
/// derived from it (spec §4.5 "GenerateAgentMessage").
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub analysis: String,
    pub proposal: Proposal,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Invoke the black-box LLM with a system and user prompt, returning its
    /// raw text response. Implementors may fail; the adapter is the only
    /// caller and always downgrades failures to a HOLD proposal.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}

/// Deterministic no-LLM client: always returns a neutral HOLD. Selected when
/// `LLM_ENABLED=false` (the default), and used as the test double the spec's
/// design notes call for in place of the removed template-message path.
pub struct HoldFallbackClient;

#[async_trait]
impl LlmClient for HoldFallbackClient {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
        Ok(r#"{"action":"HOLD","allocationPercent":0,"confidence":1,"reasoning":"LLM disabled"}"#
            .to_string())
    }
}

/// Live client backed by an HTTP endpoint expected to accept
/// `{systemPrompt, userPrompt}` and return `{"text": "..."}`.
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.base_url)
            .json(&serde_json::json!({
                "systemPrompt": system_prompt,
                "userPrompt": user_prompt,
                "jsonMode": true,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body.get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("LLM response missing `text` field"))
    }
}

/// Build the system prompt exactly as spec'd (spec §4.5: "must be preserved
/// bit-for-bit across reimplementations").
fn build_system_prompt(agent: &Agent, sector: &Sector, trend_percent: f64) -> String {
    let style = match &agent.role {
        AgentRole::Manager => "manager",
        AgentRole::Worker(s) => s.as_str(),
    };

    format!(
        "You are {name}, a {role} agent with a {style} decision style and risk tolerance {risk:.2}.\n\
         Sector: {sector_name}. Current balance: {balance:.2}. Latest price: {price:.4}. \
         Trend: {trend:.2}%. Volatility: {vol:.2}%.\n\
         Prefer proposing BUY or SELL over HOLD when the evidence supports it.",
        name = agent.display_name,
        role = agent.role,
        style = style,
        risk = agent.risk_tolerance,
        sector_name = sector.name,
        balance = sector.balance,
        price = sector.current_price,
        trend = trend_percent,
        vol = sector.volatility * 100.0,
    )
}

/// Build the user prompt, including the rejected-items refinement context
/// when the agent has open refinement cycles (spec §4.5).
fn build_user_prompt(agent: &Agent, discussion: &Discussion) -> String {
    let mut prompt = String::from(
        "Respond with strictly JSON: {\"action\": \"BUY\"|\"SELL\"|\"HOLD\", \
         \"allocationPercent\": number, \"confidence\": number, \"reasoning\": string, \
         \"riskNotes\": string (optional)}.",
    );

    let open_cycles: Vec<_> = discussion
        .active_refinement_cycles
        .values()
        .filter(|cycle| {
            discussion
                .checklist
                .iter()
                .any(|item| item.id == cycle.item_id && item.source_agent_id == agent.id)
        })
        .collect();

    if !open_cycles.is_empty() {
        prompt.push_str("\nYour previous proposals were rejected for the following reasons; \
            the items themselves are immutable — submit a genuinely new proposal:");
        for cycle in open_cycles {
            prompt.push_str(&format!("\n- item {}: {}", cycle.item_id, cycle.reason));
        }
    }

    prompt
}

/// Parse the LLM's raw text into a `Proposal`, never failing: malformed or
/// missing fields degrade to `normalize_decision`'s HOLD default.
fn parse_response(raw: &str, fallback_reasoning: &str) -> Proposal {
    let parsed: Option<Value> = serde_json::from_str(raw).ok().or_else(|| {
        raw.find('{').and_then(|start| {
            raw.rfind('}').and_then(|end| {
                if end > start {
                    serde_json::from_str(&raw[start..=end]).ok()
                } else {
                    None
                }
            })
        })
    });

    normalize_decision(parsed, fallback_reasoning)
}

/// Always returns a well-formed `Proposal`, filling in spec-mandated
/// defaults for any missing field (spec §4.5 "normalizeDecision").
pub fn normalize_decision(parsed: Option<Value>, fallback_reasoning: &str) -> Proposal {
    let Some(value) = parsed else {
        return Proposal::neutral_hold(fallback_reasoning);
    };

    let action = value
        .get("action")
        .and_then(|v| v.as_str())
        .map(str::to_uppercase);

    let fields = ProposalFields {
        symbol: value
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_uppercase(),
        allocation_percent: value
            .get("allocationPercent")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 100.0),
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
            .clamp(0.0, 100.0),
        reasoning: value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_reasoning)
            .to_string(),
        risk_notes: value
            .get("riskNotes")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        signal_strength: value.get("signalStrength").and_then(Value::as_f64),
        volatility: value.get("volatility").and_then(Value::as_f64),
    };

    match action.as_deref() {
        Some("BUY") => Proposal::Buy(fields),
        Some("SELL") => Proposal::Sell(fields),
        Some("HOLD") => Proposal::Hold(fields),
        _ => Proposal::neutral_hold(fallback_reasoning),
    }
}

/// Rewrite a HOLD proposal to a mildly confident BUY when the sector is
/// trending up and the sector has capital to deploy (spec §4.5
/// post-process step).
fn apply_hold_bias_override(proposal: Proposal, balance: f64, trend_percent: f64, symbol: &str) -> Proposal {
    match proposal {
        Proposal::Hold(fields) if balance > 0.0 && trend_percent > 0.5 => {
            let allocation_percent = 10.0 + (trend_percent.min(15.0) / 15.0) * 15.0;
            let confidence = 40.0 + (trend_percent.min(15.0) / 15.0) * 25.0;
            let mut reasoning = fields.reasoning;
            reasoning.push_str(" [auto-upgraded from HOLD: positive sector trend]");

            Proposal::Buy(ProposalFields {
                symbol: if fields.symbol.is_empty() {
                    symbol.to_string()
                } else {
                    fields.symbol
                },
                allocation_percent: allocation_percent.clamp(10.0, 25.0),
                confidence: confidence.clamp(40.0, 65.0),
                reasoning,
                risk_notes: fields.risk_notes,
                signal_strength: fields.signal_strength,
                volatility: fields.volatility,
            })
        }
        other => other,
    }
}

/// Drive one full agent turn: build prompts, call the client under a bounded
/// timeout, parse the response, and apply the post-processing override.
/// Never returns an error — every failure path degrades to a neutral HOLD.
pub async fn generate_agent_message(
    client: &dyn LlmClient,
    agent: &Agent,
    sector: &Sector,
    discussion: &Discussion,
    timeout: Duration,
) -> AgentTurn {
    let system_prompt = build_system_prompt(agent, sector, sector.change_percent);
    let user_prompt = build_user_prompt(agent, discussion);

    let raw = match tokio::time::timeout(timeout, client.complete(&system_prompt, &user_prompt)).await
    {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            warn!(agent_id = %agent.id, %err, "llm call failed");
            return AgentTurn {
                analysis: format!("Unable to generate proposal: {err}"),
                proposal: Proposal::neutral_hold(format!("Unable to generate proposal: {err}")),
            };
        }
        Err(_) => {
            warn!(agent_id = %agent.id, "llm call timed out");
            return AgentTurn {
                analysis: "Unable to generate proposal: timeout".to_string(),
                proposal: Proposal::neutral_hold("Unable to generate proposal: timeout"),
            };
        }
    };

    debug!(agent_id = %agent.id, raw_len = raw.len(), "llm response received");

    let proposal = parse_response(&raw, "Unable to generate proposal: malformed response");
    let default_symbol = sector.allowed_symbols.first().cloned().unwrap_or_default();
    let proposal =
        apply_hold_bias_override(proposal, sector.balance, sector.change_percent, &default_symbol);

    AgentTurn {
        analysis: proposal.fields().reasoning.clone(),
        proposal,
    }
}

/// Build the non-participating "observation" message for an agent below the
/// gating threshold (spec §4.9 round loop).
pub fn observation_message(agent: &Agent, round: u32) -> Message {
    Message::new(
        agent.id.clone(),
        round,
        "observer",
        format!(
            "{} is below the participation threshold this round (confidence {:.1}).",
            agent.display_name, agent.confidence
        ),
        Some(Proposal::Hold(ProposalFields {
            symbol: String::new(),
            allocation_percent: 0.0,
            confidence: agent.confidence,
            reasoning: "non-participating observation".to_string(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_decision_defaults_on_none() {
        let p = normalize_decision(None, "no response");
        assert_eq!(p.action(), crate::types::ActionType::Hold);
        assert_eq!(p.fields().confidence, 1.0);
    }

    #[test]
    fn normalize_decision_parses_well_formed_buy() {
        let value = json!({
            "action": "buy",
            "symbol": "s1",
            "allocationPercent": 15.0,
            "confidence": 72.0,
            "reasoning": "uptrend"
        });
        let p = normalize_decision(Some(value), "fallback");
        assert_eq!(p.action(), crate::types::ActionType::Buy);
        assert_eq!(p.fields().symbol, "S1");
        assert_eq!(p.fields().allocation_percent, 15.0);
    }

    #[test]
    fn normalize_decision_rejects_unknown_action_to_hold() {
        let value = json!({"action": "YOLO"});
        let p = normalize_decision(Some(value), "fallback reason");
        assert_eq!(p.action(), crate::types::ActionType::Hold);
    }

    #[test]
    fn parse_response_extracts_embedded_json_object() {
        let raw = "here is my answer: {\"action\":\"SELL\",\"symbol\":\"S1\",\"allocationPercent\":5,\"confidence\":60,\"reasoning\":\"r\"} thanks";
        let p = parse_response(raw, "fallback");
        assert_eq!(p.action(), crate::types::ActionType::Sell);
    }

    #[test]
    fn parse_response_falls_back_on_garbage() {
        let p = parse_response("not json at all", "fallback reason");
        assert_eq!(p.action(), crate::types::ActionType::Hold);
        assert_eq!(p.fields().confidence, 1.0);
    }

    #[test]
    fn hold_bias_override_rewrites_to_buy_on_positive_trend() {
        let hold = Proposal::Hold(ProposalFields {
            symbol: "S1".into(),
            allocation_percent: 0.0,
            confidence: 1.0,
            reasoning: "no signal".into(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        });
        let rewritten = apply_hold_bias_override(hold, 1000.0, 2.0, "S1");
        assert_eq!(rewritten.action(), crate::types::ActionType::Buy);
        assert!(rewritten.fields().allocation_percent >= 10.0 && rewritten.fields().allocation_percent <= 25.0);
        assert!(rewritten.fields().confidence >= 40.0 && rewritten.fields().confidence <= 65.0);
    }

    #[test]
    fn hold_bias_override_leaves_hold_on_flat_trend() {
        let hold = Proposal::Hold(ProposalFields {
            symbol: "S1".into(),
            allocation_percent: 0.0,
            confidence: 1.0,
            reasoning: "no signal".into(),
            risk_notes: None,
            signal_strength: None,
            volatility: None,
        });
        let unchanged = apply_hold_bias_override(hold, 1000.0, 0.1, "S1");
        assert_eq!(unchanged.action(), crate::types::ActionType::Hold);
    }

    #[tokio::test]
    async fn hold_fallback_client_always_returns_hold_json() {
        let client = HoldFallbackClient;
        let raw = client.complete("sys", "user").await.unwrap();
        assert!(raw.contains("HOLD"));
    }
}
