use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::AppState;

/// POST /api/control/pause: pause the periodic accrual loop.
pub async fn pause<S: LedgerStore>(State(state): State<AppState<S>>) -> Json<ApiResponse<Value>> {
    state.pause_flag.store(true, Ordering::Relaxed);
    tracing::warn!("Accrual scheduler PAUSED via control API");
    ApiResponse::ok(json!({ "status": "paused" }))
}

/// POST /api/control/resume: resume the periodic accrual loop.
pub async fn resume<S: LedgerStore>(State(state): State<AppState<S>>) -> Json<ApiResponse<Value>> {
    state.pause_flag.store(false, Ordering::Relaxed);
    tracing::info!("Accrual scheduler RESUMED via control API");
    ApiResponse::ok(json!({ "status": "running" }))
}
