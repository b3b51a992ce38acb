// =============================================================================
// Discussion Engine — spec §4.9
// =============================================================================
//
// Orchestrates one discussion's full lifecycle: eligibility check, creation
// under the per-sector serial-execution lock, the multi-round worker
// contribution loop, checklist finalization, and handing evaluation off to
// the manager engine. One `DiscussionEngine` is shared (behind `Arc`) by the
// scheduler and the HTTP layer; each discussion's round loop runs as its own
// spawned task, matching the "single owning task per discussion" design note
// (spec §9) that replaces the source's reload-mutate-save loop.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::checklist::{create_checklist_from_proposal, ValidationContext};
use crate::config::{RuntimeConfig, GATING_THRESHOLD};
use crate::discussion_status::{self, transition_status};
use crate::domain::{Agent, Discussion, Message};
use crate::errors::{SimError, SimResult};
use crate::llm_adapter::{generate_agent_message, observation_message, LlmClient};
use crate::manager_engine;
use crate::persistence::Store;
use crate::types::{AgentRole, DiscussionStatus};

pub struct DiscussionEngine {
    store: Arc<Store>,
    llm: Arc<dyn LlmClient>,
    config: RuntimeConfig,
}

impl DiscussionEngine {
    pub fn new(store: Arc<Store>, llm: Arc<dyn LlmClient>, config: RuntimeConfig) -> Self {
        Self { store, llm, config }
    }

    /// Validate eligibility, create the discussion under the serial lock,
    /// persist it, and spawn its round loop. Mirrors spec §4.9 "StartDiscussion".
    pub async fn start_discussion(self: &Arc<Self>, sector_id: &str) -> SimResult<Discussion> {
        let sector = self
            .store
            .sectors
            .find(|s| s.id == sector_id)
            .await
            .ok_or_else(|| SimError::not_found("sector", sector_id))?;

        let all_agents = self.store.agents.all().await;
        let sector_agents: Vec<Agent> = all_agents
            .into_iter()
            .filter(|a| a.sector_id == sector_id)
            .collect();
        let workers: Vec<Agent> = sector_agents
            .iter()
            .filter(|a| !a.role.is_manager())
            .cloned()
            .collect();

        manager_engine::check_eligibility(&sector, &workers)?;

        let participant_ids: Vec<String> = workers.iter().map(|a| a.id.clone()).collect();
        let discussion = Discussion::new(
            sector_id,
            format!("{} discussion", sector.name),
            participant_ids,
            self.config.rounds_per_discussion,
        );

        // Serial-execution lock: the "no active discussion" check and the
        // persist of the new discussion happen inside one lock acquisition,
        // so two concurrent callers can never both observe the sector as
        // free (spec §5).
        let sid = sector_id.to_string();
        let accepted = self
            .store
            .discussions
            .check_and_push(
                move |existing| {
                    !existing
                        .iter()
                        .any(|d| d.sector_id == sid && d.status.is_active())
                },
                discussion.clone(),
            )
            .await?;

        if !accepted {
            return Err(SimError::contention(sector_id));
        }
        self.store
            .sectors
            .update(
                |s| s.id == sector_id,
                |s| s.discussion_ids.push(discussion.id.clone()),
            )
            .await?;

        info!(discussion_id = %discussion.id, sector_id, "discussion started");

        let engine = Arc::clone(self);
        let discussion_id = discussion.id.clone();
        let rounds = self.config.rounds_per_discussion;
        tokio::spawn(async move {
            if let Err(err) = engine.start_rounds(&discussion_id, rounds).await {
                error!(discussion_id = %discussion_id, %err, "round loop failed");
            }
        });

        Ok(discussion)
    }

    /// Drive the round loop for an existing discussion. Idempotent: a second
    /// call resumes from `current_round + 1` rather than repeating rounds
    /// already recorded (spec §8 "idempotent resume").
    pub async fn start_rounds(&self, discussion_id: &str, target_round: u32) -> SimResult<()> {
        let mut discussion = self
            .store
            .discussions
            .find(|d| d.id == discussion_id)
            .await
            .ok_or_else(|| SimError::not_found("discussion", discussion_id))?;

        if discussion.status == DiscussionStatus::Created {
            transition_status(&mut discussion, DiscussionStatus::InProgress, "round start")?;
            self.persist(&discussion).await?;
        }

        if discussion.status.is_terminal() {
            return Ok(());
        }

        let start_round = if discussion.current_round > 0 {
            discussion.current_round + 1
        } else {
            1
        };

        for round in start_round..=target_round {
            self.run_one_round(&mut discussion, round).await?;
            discussion.current_round = round;
            discussion.snapshot_round(round);
            self.persist(&discussion).await?;

            if round < target_round {
                tokio::time::sleep(self.config.round_delay).await;
            }
        }

        if discussion.messages.is_empty() {
            transition_status(&mut discussion, DiscussionStatus::Closed, "no messages")?;
            self.persist(&discussion).await?;
            return Ok(());
        }

        self.finalize_checklist(&mut discussion).await?;
        manager_engine::evaluate_pending_items(&mut discussion);
        discussion_status::check_and_transition_to_awaiting_execution(&mut discussion)?;
        self.persist(&discussion).await?;

        Ok(())
    }

    async fn run_one_round(&self, discussion: &mut Discussion, round: u32) -> SimResult<()> {
        let sector = self
            .store
            .sectors
            .find(|s| s.id == discussion.sector_id)
            .await
            .ok_or_else(|| SimError::not_found("sector", &discussion.sector_id))?;

        let all_agents = self.store.agents.all().await;
        let participants: Vec<Agent> = all_agents
            .into_iter()
            .filter(|a| discussion.participant_ids.contains(&a.id))
            .collect();

        for agent in &participants {
            if discussion.has_attempted_checklist_creation(&agent.id, round) {
                continue;
            }

            let message = if agent.confidence < GATING_THRESHOLD {
                observation_message(agent, round)
            } else {
                let turn = generate_agent_message(
                    self.llm.as_ref(),
                    agent,
                    &sector,
                    discussion,
                    self.config.llm_timeout,
                )
                .await;

                let message = Message::new(
                    agent.id.clone(),
                    round,
                    role_label(&agent.role),
                    turn.analysis.clone(),
                    Some(turn.proposal.clone()),
                );

                discussion.mark_checklist_attempted(&agent.id, round);

                if !discussion.has_checklist_item_for_round(&agent.id, round) {
                    let ctx = ValidationContext {
                        allowed_symbols: &sector.allowed_symbols,
                        allow_zero_amount: false,
                        allow_zero_allocation: false,
                    };
                    let item = create_checklist_from_proposal(
                        agent.id.clone(),
                        round,
                        &turn.proposal,
                        &ctx,
                    );
                    discussion.checklist.push(item);
                }

                message
            };

            discussion.record_message(message);
        }

        Ok(())
    }

    /// Per spec §4.9: a single consensus pass over the whole transcript.
    /// Since the round loop already attempts checklist creation for every
    /// eligible participant, a non-empty checklist at this point *is* that
    /// consensus outcome. Only a discussion where nobody met the gating
    /// threshold all the way through — hence no checklist items at all —
    /// falls back to aggregating the latest round's observation messages by
    /// action type.
    async fn finalize_checklist(&self, discussion: &mut Discussion) -> SimResult<()> {
        if !discussion.checklist.is_empty() {
            return Ok(());
        }

        warn!(
            discussion_id = %discussion.id,
            "no checklist items produced during rounds, aggregating latest round"
        );

        let latest_round = discussion.current_round;
        let sector = self
            .store
            .sectors
            .find(|s| s.id == discussion.sector_id)
            .await
            .ok_or_else(|| SimError::not_found("sector", &discussion.sector_id))?;

        let mut seen_actions = HashSet::new();
        let latest_messages: Vec<_> = discussion
            .messages
            .iter()
            .filter(|m| m.round == latest_round)
            .cloned()
            .collect();

        for message in latest_messages {
            let Some(proposal) = message.proposal else {
                continue;
            };
            let action = proposal.action();
            if !seen_actions.insert(action) {
                continue;
            }

            let ctx = ValidationContext {
                allowed_symbols: &sector.allowed_symbols,
                allow_zero_amount: true,
                allow_zero_allocation: true,
            };
            let item = create_checklist_from_proposal(
                message.agent_id.clone(),
                latest_round,
                &proposal,
                &ctx,
            );
            discussion.checklist.push(item);
        }

        Ok(())
    }

    async fn persist(&self, discussion: &Discussion) -> SimResult<()> {
        let id = discussion.id.clone();
        let updated = discussion.clone();
        self.store
            .discussions
            .update(move |d| d.id == id, move |d| *d = updated.clone())
            .await?;
        Ok(())
    }
}

fn role_label(role: &AgentRole) -> &'static str {
    match role {
        AgentRole::Manager => "manager",
        AgentRole::Worker(_) => "worker",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sector;
    use crate::llm_adapter::HoldFallbackClient;
    use std::time::Duration;

    async fn test_store() -> Arc<Store> {
        let dir = std::env::temp_dir().join(format!("sector-sim-engine-test-{}", uuid::Uuid::new_v4()));
        Arc::new(Store::open(dir).unwrap())
    }

    async fn seed_sector_with_workers(store: &Store, confidences: &[f64]) -> String {
        let mut sector = Sector::new("Demo", "DEMO", vec!["S1".into()], 1000.0, 10.0);
        sector.change_percent = 1.5;
        let sector_id = sector.id.clone();

        let manager = Agent::new_manager(sector_id.clone(), "Manager");
        sector.agent_ids.push(manager.id.clone());
        store.agents.push(manager).await.unwrap();

        for (i, confidence) in confidences.iter().enumerate() {
            let mut worker = Agent::new_worker(sector_id.clone(), format!("W{i}"), "momentum", 0.5);
            worker.set_confidence(*confidence);
            sector.agent_ids.push(worker.id.clone());
            store.agents.push(worker).await.unwrap();
        }

        store.sectors.push(sector).await.unwrap();
        sector_id
    }

    #[tokio::test]
    async fn start_discussion_fails_below_gating_threshold() {
        let store = test_store().await;
        let sector_id = seed_sector_with_workers(&store, &[60.0]).await;

        let engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            Arc::new(HoldFallbackClient),
            RuntimeConfig {
                round_delay: Duration::from_millis(0),
                ..RuntimeConfig::default()
            },
        ));

        let result = engine.start_discussion(&sector_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_discussion_succeeds_and_runs_rounds_to_decided_or_awaiting() {
        let store = test_store().await;
        let sector_id = seed_sector_with_workers(&store, &[70.0, 70.0]).await;

        let engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            Arc::new(HoldFallbackClient),
            RuntimeConfig {
                round_delay: Duration::from_millis(0),
                rounds_per_discussion: 2,
                ..RuntimeConfig::default()
            },
        ));

        let discussion = engine.start_discussion(&sector_id).await.unwrap();

        // Give the spawned round loop a moment to run to completion.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let reloaded = store.discussions.find(|d| d.id == discussion.id).await.unwrap();
        assert!(matches!(
            reloaded.status,
            DiscussionStatus::AwaitingExecution | DiscussionStatus::Decided | DiscussionStatus::Closed
        ));
    }

    #[tokio::test]
    async fn concurrent_start_discussion_calls_yield_exactly_one_success() {
        let store = test_store().await;
        let sector_id = seed_sector_with_workers(&store, &[70.0]).await;

        let engine = Arc::new(DiscussionEngine::new(
            Arc::clone(&store),
            Arc::new(HoldFallbackClient),
            RuntimeConfig {
                round_delay: Duration::from_millis(0),
                ..RuntimeConfig::default()
            },
        ));

        let e1 = Arc::clone(&engine);
        let e2 = Arc::clone(&engine);
        let sid1 = sector_id.clone();
        let sid2 = sector_id.clone();

        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { e1.start_discussion(&sid1).await }),
            tokio::spawn(async move { e2.start_discussion(&sid2).await }),
        );

        let successes = [r1.unwrap(), r2.unwrap()]
            .into_iter()
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(successes, 1);
    }
}
