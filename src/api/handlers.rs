use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::api::models::{AttemptsQuery, RunSettlementRequest};
use crate::error::{AppError, AppResult};
use crate::ledger::models::{AttemptStatus, TransferAttempt};
use crate::ledger::repository::AttemptStore;
use crate::processor::ProcessorGateway;
use crate::settlement::repair::{RepairReport, RepairWorkflow};
use crate::settlement::{SettlementEngine, SettlementReport};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub repair: Arc<RepairWorkflow>,
    pub store: Arc<dyn AttemptStore>,
    pub gateway: Arc<dyn ProcessorGateway>,
    pub currency: String,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "settlement-backend",
    }))
}

/// POST /api/v1/settlement/run
///
/// Manual trigger for one settlement cycle; also the path the scheduler
/// exercises. Body is optional, `{"dry_run": true}` previews without
/// moving funds.
pub async fn run_settlement(
    State(state): State<AppState>,
    payload: Option<Json<RunSettlementRequest>>,
) -> AppResult<Json<SettlementReport>> {
    let dry_run = payload.map(|Json(p)| p.dry_run).unwrap_or(false);
    let report = state.engine.run_settlement(dry_run).await?;
    Ok(Json(report))
}

/// POST /api/v1/settlement/repair
pub async fn run_repair(State(state): State<AppState>) -> AppResult<Json<RepairReport>> {
    let report = state.repair.run_repair().await?;
    Ok(Json(report))
}

/// GET /api/v1/settlement/attempts?status=failed&from=...&to=...
pub async fn list_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptsQuery>,
) -> AppResult<Json<Vec<TransferAttempt>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<AttemptStatus>)
        .transpose()?;

    let attempts = state
        .store
        .list_attempts(status, query.from, query.to)
        .await?;
    Ok(Json(attempts))
}

/// GET /api/v1/settlement/attempts/:id
pub async fn get_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TransferAttempt>> {
    state
        .store
        .get_attempt(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("attempt {}", id)))
}

/// GET /api/v1/settlement/balance
pub async fn get_processor_balance(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let available = state.gateway.available_balance(&state.currency).await?;
    Ok(Json(serde_json::json!({
        "currency": state.currency,
        "available": available,
    })))
}
