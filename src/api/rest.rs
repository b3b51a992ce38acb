// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Every response is the uniform envelope `{success, error?, reason?}` on
// failure, produced automatically by `SimError`'s `IntoResponse` impl, or the
// requested resource on success. There is no auth layer here: role
// separation (manager vs. worker) is enforced inside the engine, never at
// the transport boundary.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::{AppState, DiscussionView};
use crate::config::MAX_WORKERS_PER_SECTOR;
use crate::domain::{Agent, Discussion, Sector};
use crate::errors::{SimError, SimResult};
use crate::types::DiscussionStatus;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", axum::routing::get(health))
        .route(
            "/sectors",
            axum::routing::get(list_sectors).post(create_sector),
        )
        .route(
            "/sectors/:id",
            axum::routing::get(get_sector).delete(delete_sector),
        )
        .route("/sectors/:id/deposit", axum::routing::post(deposit))
        .route("/sectors/:id/withdraw", axum::routing::post(withdraw))
        .route(
            "/sectors/:id/executionLogs",
            axum::routing::get(execution_logs),
        )
        .route("/agents", axum::routing::get(list_agents))
        .route(
            "/discussions",
            axum::routing::get(list_discussions).post(create_discussion),
        )
        .route("/discussions/:id", axum::routing::get(get_discussion))
        .route(
            "/discussions/:id/message",
            axum::routing::post(post_message),
        )
        .route(
            "/discussions/:id/start-rounds",
            axum::routing::post(start_rounds),
        )
        .route(
            "/discussions/:id/close",
            axum::routing::post(close_discussion),
        )
        .route(
            "/discussions/:id/archive",
            axum::routing::post(archive_discussion),
        )
        .route(
            "/discussions/:id/state",
            axum::routing::get(discussion_state),
        )
        .route(
            "/discussions/:id/validate-invariants",
            axum::routing::get(validate_invariants),
        )
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// ── Sectors ──────────────────────────────────────────────────────────────

async fn list_sectors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.sectors.all().await)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSectorRequest {
    name: String,
    ticker: String,
    allowed_symbols: Vec<String>,
    #[serde(default = "default_balance")]
    initial_balance: f64,
    #[serde(default = "default_price")]
    initial_price: f64,
    #[serde(default)]
    worker_decision_styles: Vec<String>,
}

fn default_balance() -> f64 {
    1000.0
}

fn default_price() -> f64 {
    100.0
}

async fn create_sector(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSectorRequest>,
) -> SimResult<impl IntoResponse> {
    if req.allowed_symbols.is_empty() {
        return Err(SimError::validation(
            "allowedSymbols",
            "must contain at least one symbol",
        ));
    }

    if req.worker_decision_styles.len() > MAX_WORKERS_PER_SECTOR {
        return Err(SimError::validation(
            "workerDecisionStyles",
            format!("sector worker count must be <= {MAX_WORKERS_PER_SECTOR}"),
        ));
    }

    let mut sector = Sector::new(
        req.name,
        req.ticker,
        req.allowed_symbols,
        req.initial_balance,
        req.initial_price,
    );

    let manager = Agent::new_manager(sector.id.clone(), "Manager");
    sector.agent_ids.push(manager.id.clone());
    state.store.agents.push(manager).await?;

    for style in &req.worker_decision_styles {
        let worker = Agent::new_worker(
            sector.id.clone(),
            format!("Worker-{style}"),
            style.as_str(),
            0.5,
        );
        sector.agent_ids.push(worker.id.clone());
        state.store.agents.push(worker).await?;
    }

    state.store.sectors.push(sector.clone()).await?;
    state
        .scheduler
        .spawn_sector(sector.id.clone(), sector.baseline_price, sector.volatility)
        .await;
    state.increment_version();

    info!(sector_id = %sector.id, "sector created");
    Ok((axum::http::StatusCode::CREATED, Json(sector)))
}

async fn get_sector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    let view = state
        .sector_view(&id)
        .await
        .ok_or_else(|| SimError::not_found("sector", &id))?;
    Ok(Json(view))
}

#[derive(Deserialize, Default)]
struct DeleteSectorRequest {
    #[serde(default)]
    confirm: bool,
}

async fn delete_sector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<DeleteSectorRequest>>,
) -> SimResult<impl IntoResponse> {
    let confirm = body.map(|Json(req)| req.confirm).unwrap_or(false);
    if !confirm {
        return Err(SimError::validation(
            "confirm",
            "sector deletion requires { \"confirm\": true } in the request body",
        ));
    }

    let sector = state
        .store
        .sectors
        .find(|s| s.id == id)
        .await
        .ok_or_else(|| SimError::not_found("sector", &id))?;
    let balance = sector.balance;

    state.scheduler.cancel_sector(&id).await;
    let removed = state.store.sectors.remove(|s| s.id == id).await?;
    if !removed {
        return Err(SimError::not_found("sector", &id));
    }
    state.store.agents.remove(|a| a.sector_id == id).await?;
    state.increment_version();

    info!(sector_id = %id, balance, "sector deleted");
    Ok(Json(serde_json::json!({ "success": true, "balance": balance })))
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: f64,
}

async fn deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> SimResult<impl IntoResponse> {
    if req.amount <= 0.0 {
        return Err(SimError::validation("amount", "must be > 0"));
    }
    let sid = id.clone();
    let amount = req.amount;
    let updated = state
        .store
        .sectors
        .update(move |s| s.id == sid, move |s| s.balance += amount)
        .await?;
    if !updated {
        return Err(SimError::not_found("sector", &id));
    }
    let sector = state.store.sectors.find(|s| s.id == id).await.unwrap();
    state.increment_version();
    Ok(Json(sector))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AmountRequest>,
) -> SimResult<impl IntoResponse> {
    if req.amount <= 0.0 {
        return Err(SimError::validation("amount", "must be > 0"));
    }

    let sector = state
        .store
        .sectors
        .find(|s| s.id == id)
        .await
        .ok_or_else(|| SimError::not_found("sector", &id))?;
    if req.amount > sector.balance {
        return Err(SimError::validation("amount", "exceeds sector balance"));
    }

    let sid = id.clone();
    let amount = req.amount;
    state
        .store
        .sectors
        .update(move |s| s.id == sid, move |s| s.balance -= amount)
        .await?;
    let sector = state.store.sectors.find(|s| s.id == id).await.unwrap();
    state.increment_version();
    Ok(Json(sector))
}

async fn execution_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    let log = state.store.execution_log(&id).await?;
    Ok(Json(log))
}

// ── Agents ───────────────────────────────────────────────────────────────

async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.agents.all().await)
}

// ── Discussions ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionQuery {
    #[serde(default)]
    sector_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionSummary {
    id: String,
    sector_id: String,
    title: String,
    status: DiscussionStatus,
    current_round: u32,
    checklist_count: usize,
}

impl From<&Discussion> for DiscussionSummary {
    fn from(d: &Discussion) -> Self {
        Self {
            id: d.id.clone(),
            sector_id: d.sector_id.clone(),
            title: d.title.clone(),
            status: d.status,
            current_round: d.current_round,
            checklist_count: d.checklist.len(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: usize,
    page_size: usize,
    total: usize,
}

async fn list_discussions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiscussionQuery>,
) -> impl IntoResponse {
    let all = state.store.discussions.all().await;

    let filtered: Vec<&Discussion> = all
        .iter()
        .filter(|d| {
            query
                .sector_id
                .as_ref()
                .map(|sid| &d.sector_id == sid)
                .unwrap_or(true)
        })
        .filter(|d| {
            query
                .status
                .as_ref()
                .map(|status| d.status.to_string() == *status)
                .unwrap_or(true)
        })
        .collect();

    let total = filtered.len();
    let start = (query.page.max(1) - 1) * query.page_size;
    let page_items: Vec<DiscussionSummary> = filtered
        .into_iter()
        .skip(start)
        .take(query.page_size)
        .map(DiscussionSummary::from)
        .collect();

    let mut status_counts = serde_json::Map::new();
    for d in &all {
        let key = d.status.to_string();
        let count = status_counts
            .entry(key)
            .or_insert_with(|| serde_json::json!(0));
        *count = serde_json::json!(count.as_i64().unwrap_or(0) + 1);
    }

    Json(serde_json::json!({
        "discussions": page_items,
        "pagination": Pagination { page: query.page, page_size: query.page_size, total },
        "statusCounts": status_counts,
    }))
}

async fn get_discussion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    let view: DiscussionView = state
        .discussion_view(&id)
        .await
        .ok_or_else(|| SimError::not_found("discussion", &id))?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDiscussionRequest {
    sector_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    title: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    agent_ids: Option<Vec<String>>,
}

async fn create_discussion(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDiscussionRequest>,
) -> SimResult<impl IntoResponse> {
    let discussion = state
        .discussion_engine
        .start_discussion(&req.sector_id)
        .await?;
    state.increment_version();
    Ok((axum::http::StatusCode::CREATED, Json(discussion)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageRequest {
    agent_id: String,
    content: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    proposal: Option<crate::domain::Proposal>,
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> SimResult<impl IntoResponse> {
    let discussion = state
        .store
        .discussions
        .find(|d| d.id == id)
        .await
        .ok_or_else(|| SimError::not_found("discussion", &id))?;

    let message = crate::domain::discussion::Message::new(
        req.agent_id,
        discussion.current_round,
        req.role.unwrap_or_else(|| "worker".to_string()),
        req.content,
        req.proposal,
    );

    let did = id.clone();
    let message_clone = message.clone();
    state
        .store
        .discussions
        .update(move |d| d.id == did, move |d| {
            d.record_message(message_clone.clone())
        })
        .await?;
    state.increment_version();

    Ok(Json(message))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StartRoundsRequest {
    #[serde(default)]
    num_rounds: Option<u32>,
}

async fn start_rounds(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<StartRoundsRequest>>,
) -> SimResult<impl IntoResponse> {
    let rounds = body
        .and_then(|Json(b)| b.num_rounds)
        .unwrap_or(state.config.rounds_per_discussion);

    let engine = Arc::clone(&state.discussion_engine);
    let did = id.clone();
    tokio::spawn(async move {
        if let Err(err) = engine.start_rounds(&did, rounds).await {
            tracing::error!(discussion_id = %did, %err, "start-rounds request failed");
        }
    });

    Ok(Json(serde_json::json!({ "success": true, "scheduled": true })))
}

async fn close_discussion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    transition_discussion(&state, &id, DiscussionStatus::Closed).await
}

async fn archive_discussion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    transition_discussion(&state, &id, DiscussionStatus::Decided).await
}

async fn transition_discussion(
    state: &Arc<AppState>,
    id: &str,
    target: DiscussionStatus,
) -> SimResult<impl IntoResponse> {
    let mut discussion = state
        .store
        .discussions
        .find(|d| d.id == id)
        .await
        .ok_or_else(|| SimError::not_found("discussion", id))?;

    let reason = if target == DiscussionStatus::Closed {
        "manual close"
    } else {
        "manual archive"
    };
    crate::discussion_status::transition_status(&mut discussion, target, reason)?;

    let did = id.to_string();
    let updated = discussion.clone();
    state
        .store
        .discussions
        .update(move |d| d.id == did, move |d| *d = updated.clone())
        .await?;
    state.increment_version();

    Ok(Json(discussion))
}

async fn discussion_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    let discussion = state
        .store
        .discussions
        .find(|d| d.id == id)
        .await
        .ok_or_else(|| SimError::not_found("discussion", &id))?;

    Ok(Json(serde_json::json!({
        "currentRound": discussion.current_round,
        "checklist": discussion.checklist,
        "roundHistory": discussion.round_history,
        "managerDecisions": discussion.manager_decisions,
        "status": discussion.status,
    })))
}

async fn validate_invariants(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> SimResult<impl IntoResponse> {
    let discussion = state
        .store
        .discussions
        .find(|d| d.id == id)
        .await
        .ok_or_else(|| SimError::not_found("discussion", &id))?;

    let mut violations = Vec::new();

    if discussion.status.is_terminal()
        && discussion.checklist.iter().any(|item| {
            matches!(
                item.status,
                crate::types::ChecklistStatus::Pending
                    | crate::types::ChecklistStatus::ReviseRequired
            )
        })
    {
        violations.push("terminal discussion holds a non-terminal item".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for item in &discussion.checklist {
        if let Some(round) = item.round {
            if !seen.insert((item.source_agent_id.clone(), round)) {
                violations.push(format!(
                    "duplicate checklist item for agent {} round {round}",
                    item.source_agent_id
                ));
            }
        }
    }

    for item in &discussion.checklist {
        if item.revision_count > crate::config::MAX_REFINEMENT_ROUNDS {
            violations.push(format!("item {} exceeds refinement cap", item.id));
        }
    }

    Ok(Json(serde_json::json!({
        "valid": violations.is_empty(),
        "violations": violations,
        "testResults": {
            "checklistCount": discussion.checklist.len(),
            "status": discussion.status.to_string(),
        }
    })))
}
