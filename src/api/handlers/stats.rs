use axum::extract::State;
use axum::Json;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::errors::AppError;
use crate::query::{self, PlatformStats};
use crate::AppState;

pub async fn platform<S: LedgerStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<ApiResponse<PlatformStats>>, AppError> {
    let stats = query::platform_stats(state.engine.store()).await?;
    Ok(ApiResponse::ok(stats))
}
