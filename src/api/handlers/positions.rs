use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::errors::AppError;
use crate::models::{PlanSnapshot, Position, Transaction};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePositionRequest {
    pub user_id: Uuid,
    /// Plan terms as of now; stored on the position and never re-read.
    pub plan: PlanSnapshot,
    pub principal: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    /// Share of principal refunded, 0..=1. Full refund when omitted.
    pub refund_fraction: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub position: Position,
    pub refund: Option<Transaction>,
}

/// POST /api/positions
pub async fn create<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Json(body): Json<CreatePositionRequest>,
) -> Result<Json<ApiResponse<Position>>, AppError> {
    let position = state
        .engine
        .positions
        .create_position(body.user_id, body.plan, body.principal)
        .await?;
    Ok(ApiResponse::ok(position))
}

/// POST /api/positions/:id/cancel
pub async fn cancel<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<ApiResponse<CancelResponse>>, AppError> {
    let fraction = body
        .and_then(|Json(b)| b.refund_fraction)
        .unwrap_or(Decimal::ONE);
    let cancelled = state.engine.positions.cancel_position(id, fraction).await?;
    Ok(ApiResponse::ok(CancelResponse {
        position: cancelled.position,
        refund: cancelled.refund,
    }))
}
