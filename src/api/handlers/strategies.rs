use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::errors::AppError;
use crate::models::Strategy;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpsertStrategyRequest {
    pub name: String,
    pub daily_rate: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// PUT /api/strategies/:id
pub async fn upsert<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpsertStrategyRequest>,
) -> Result<Json<ApiResponse<Strategy>>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("strategy name must not be empty".into()));
    }
    if body.daily_rate.is_sign_negative() {
        return Err(AppError::BadRequest("daily_rate must not be negative".into()));
    }

    let strategy = state
        .engine
        .store()
        .upsert_strategy(Strategy {
            id,
            name: body.name,
            daily_rate: body.daily_rate,
            is_active: body.is_active,
            updated_at: Utc::now(),
        })
        .await?;

    tracing::info!(
        strategy_id = %strategy.id,
        daily_rate = %strategy.daily_rate,
        is_active = strategy.is_active,
        "Strategy upserted"
    );
    Ok(ApiResponse::ok(strategy))
}
