use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::db::LedgerStore;
use crate::errors::AppError;
use crate::ledger::{verify_user_ledger, LedgerAudit};
use crate::models::{CopyAllocation, Transaction, User};
use crate::query::{self, BalanceView, PositionView};
use crate::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

/// POST /api/users
pub async fn create<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<User> {
    let user = state.engine.store().create_user(body.email).await?;
    tracing::info!(user_id = %user.id, "User created");
    Ok(ApiResponse::ok(user))
}

pub async fn balance<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<BalanceView> {
    Ok(ApiResponse::ok(query::user_balance(state.engine.store(), id).await?))
}

pub async fn deposit<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    Ok(ApiResponse::ok(state.engine.ledger.deposit(id, body.amount).await?))
}

pub async fn withdraw<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    Ok(ApiResponse::ok(state.engine.ledger.withdraw(id, body.amount).await?))
}

/// Newest first.
pub async fn transactions<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Transaction>> {
    Ok(ApiResponse::ok(query::user_transactions(state.engine.store(), id).await?))
}

pub async fn verify_ledger<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<LedgerAudit> {
    Ok(ApiResponse::ok(verify_user_ledger(state.engine.store(), id).await?))
}

pub async fn positions<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<PositionView>> {
    let views = query::user_investments(state.engine.store(), id, Utc::now()).await?;
    Ok(ApiResponse::ok(views))
}

pub async fn allocations<S: LedgerStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<CopyAllocation>> {
    Ok(ApiResponse::ok(query::user_allocations(state.engine.store(), id).await?))
}
