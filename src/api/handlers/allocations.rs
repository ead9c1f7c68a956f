use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::errors::AppError;
use crate::models::CopyAllocation;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAllocationRequest {
    pub user_id: Uuid,
    pub strategy_id: Uuid,
    pub amount: Decimal,
}

/// POST /api/allocations
pub async fn create<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Json(body): Json<CreateAllocationRequest>,
) -> Result<Json<ApiResponse<CopyAllocation>>, AppError> {
    let allocation = state
        .engine
        .allocations
        .create_allocation(body.user_id, body.strategy_id, body.amount)
        .await?;
    Ok(ApiResponse::ok(allocation))
}

pub async fn stop<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CopyAllocation>>, AppError> {
    Ok(ApiResponse::ok(state.engine.allocations.stop_allocation(id).await?))
}

pub async fn resume<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CopyAllocation>>, AppError> {
    Ok(ApiResponse::ok(state.engine.allocations.resume_allocation(id).await?))
}
