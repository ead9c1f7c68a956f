use axum::extract::State;
use axum::Json;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::services::accrual_scheduler::SummaryReport;
use crate::AppState;

/// POST /api/accrual/run: run one cycle now and return its summary.
/// Ignores the pause flag; waits if a cycle is already running.
pub async fn run<S: LedgerStore>(State(state): State<AppState<S>>) -> Json<ApiResponse<SummaryReport>> {
    tracing::info!("Manual accrual cycle requested");
    ApiResponse::ok(state.engine.scheduler.run_cycle().await)
}
