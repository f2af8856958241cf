//! Thin glue: extract, delegate to the service, serialize. No business
//! logic lives here.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::Stream;

use crate::auth::AuthPrincipal;
use crate::error::CoreError;
use crate::live::LiveEvent;
use crate::matcher::EnqueueRequest;
use crate::model::{AgentPatch, CustomerPatch, QueueKind, QueueStatus};
use crate::service::{BulkSettleRequest, CustomerQuery, SettleRequest, TransactionQuery};
use crate::store::QueueFilter;

use super::AppState;
use super::error::ApiError;

/// Bearer-token extractor; handlers receive a verified principal.
pub struct AuthUser(pub AuthPrincipal);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(CoreError::Auth("missing authorization token".to_string()))
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError(CoreError::Auth("malformed authorization token".to_string()))
        })?;
        let principal = state.service.verify_token(token)?;
        Ok(AuthUser(principal))
    }
}

// ── Health, stats ───────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let report = state.service.health().await;
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({"status": "error"})))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let stats = state.service.stats(&principal).await?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

// ── Upstream-backed reads ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct CustomerListQuery {
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

pub async fn customers(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
    Query(q): Query<CustomerListQuery>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state
        .service
        .customers(
            &principal,
            CustomerQuery {
                agent_id,
                search: q.search,
                limit: q.limit,
                offset: q.offset,
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn agents(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state.service.agents(&principal, &agent_id).await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn pending_wagers(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state.service.pending_wagers(&principal, &agent_id).await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn weekly_figures(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state.service.weekly_figures(&principal, &agent_id).await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn agent_performance(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state
        .service
        .agent_performance(&principal, &agent_id)
        .await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn live_activity(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state.service.live_activity(&principal, &agent_id).await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

pub async fn customer_details(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path((agent_id, customer_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state
        .service
        .customer_details(&principal, &agent_id, &customer_id)
        .await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct TransactionListQuery {
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    page: Option<u32>,
}

pub async fn transactions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
    Query(q): Query<TransactionListQuery>,
) -> Result<Json<Value>, ApiError> {
    let fetched = state
        .service
        .transactions(
            &principal,
            TransactionQuery {
                agent_id,
                customer_id: q.customer_id,
                page: q.page,
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(fetched).unwrap_or_default()))
}

// ── Local writes ────────────────────────────────────────────────────

pub async fn agent_update(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(agent_id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Result<Json<Value>, ApiError> {
    let agent = state
        .service
        .agent_update(&principal, &agent_id, patch)
        .await?;
    Ok(Json(serde_json::to_value(agent).unwrap_or_default()))
}

pub async fn customer_update(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(customer_id): Path<String>,
    Json(patch): Json<CustomerPatch>,
) -> Result<Json<Value>, ApiError> {
    let customer = state
        .service
        .customer_update(&principal, &customer_id, patch)
        .await?;
    Ok(Json(serde_json::to_value(customer).unwrap_or_default()))
}

// ── Settlement ──────────────────────────────────────────────────────

pub async fn settle(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<SettleRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.service.settle(&principal, req).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

pub async fn bulk_settle(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<BulkSettleRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.service.bulk_settle(&principal, req).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

// ── Queues & matches ────────────────────────────────────────────────

pub async fn enqueue_withdrawal(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<Value>, ApiError> {
    let item = state.service.enqueue_withdrawal(&principal, req).await?;
    Ok(Json(serde_json::to_value(item).unwrap_or_default()))
}

pub async fn enqueue_deposit(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(req): Json<EnqueueRequest>,
) -> Result<Json<Value>, ApiError> {
    let item = state.service.enqueue_deposit(&principal, req).await?;
    Ok(Json(serde_json::to_value(item).unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct QueueListQuery {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

pub async fn queue_items(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(q): Query<QueueListQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = QueueFilter {
        kind: q.kind.as_deref().and_then(QueueKind::parse),
        status: q.status.as_deref().and_then(QueueStatus::parse),
        limit: None,
    };
    let items = state.service.queue_items(&principal, filter).await?;
    Ok(Json(serde_json::to_value(items).unwrap_or_default()))
}

pub async fn run_matcher(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let matches = state.service.run_matcher(&principal).await?;
    Ok(Json(serde_json::to_value(matches).unwrap_or_default()))
}

pub async fn start_match(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(match_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let m = state.service.start_match(&principal, &match_id).await?;
    Ok(Json(serde_json::to_value(m).unwrap_or_default()))
}

#[derive(Deserialize, Default)]
pub struct CompleteMatchBody {
    #[serde(default)]
    note: Option<String>,
}

pub async fn complete_match(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(match_id): Path<String>,
    Json(body): Json<CompleteMatchBody>,
) -> Result<Json<Value>, ApiError> {
    let m = state
        .service
        .complete_match(&principal, &match_id, body.note.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(m).unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct FailMatchBody {
    reason: String,
    #[serde(default)]
    retryable: bool,
}

pub async fn fail_match(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(match_id): Path<String>,
    Json(body): Json<FailMatchBody>,
) -> Result<Json<Value>, ApiError> {
    let m = state
        .service
        .fail_match(&principal, &match_id, &body.reason, body.retryable)
        .await?;
    Ok(Json(serde_json::to_value(m).unwrap_or_default()))
}

// ── Live push (SSE) ─────────────────────────────────────────────────

pub async fn live_stream(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut subscription = state.service.subscribe_live(&principal).await?;

    let stream = async_stream::stream! {
        while let Some(event) = subscription.rx.recv().await {
            let done = matches!(event, LiveEvent::Shutdown { .. });
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream))
}
