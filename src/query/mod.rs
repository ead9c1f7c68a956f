//! Read-only projections for dashboards. Nothing here writes, and nothing
//! here may be used to guard a mutation: the ledger re-reads balances under
//! lock when it commits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::LedgerStore;
use crate::errors::LedgerError;
use crate::models::{CopyAllocation, Position, Transaction};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStats {
    pub total_users: i64,
    pub total_balance: Decimal,
    pub active_positions: i64,
    pub completed_positions: i64,
    pub cancelled_positions: i64,
    pub active_principal: Decimal,
    pub total_profit_paid: Decimal,
    pub active_allocations: i64,
    pub total_allocated: Decimal,
    pub copy_trading_earned: Decimal,
    pub transaction_count: i64,
}

/// A position as shown on the user's investment page.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub days_remaining: i64,
    pub percent_earned: Decimal,
}

impl PositionView {
    pub fn at(position: Position, now: DateTime<Utc>) -> Self {
        Self {
            days_remaining: position.days_remaining(now),
            percent_earned: position.percent_earned(),
            position,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub as_of: DateTime<Utc>,
}

pub async fn user_balance<S: LedgerStore>(store: &S, user_id: Uuid) -> Result<BalanceView, LedgerError> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or(LedgerError::UserNotFound(user_id))?;
    Ok(BalanceView {
        user_id,
        balance: user.balance,
        as_of: user.updated_at,
    })
}

/// Investments of a user, newest first, with progress figures.
pub async fn user_investments<S: LedgerStore>(
    store: &S,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<PositionView>, LedgerError> {
    let positions = store.positions_for_user(user_id).await?;
    Ok(positions
        .into_iter()
        .map(|p| PositionView::at(p, now))
        .collect())
}

pub async fn user_allocations<S: LedgerStore>(
    store: &S,
    user_id: Uuid,
) -> Result<Vec<CopyAllocation>, LedgerError> {
    store.allocations_for_user(user_id).await
}

/// Ledger rows of a user, newest first.
pub async fn user_transactions<S: LedgerStore>(
    store: &S,
    user_id: Uuid,
) -> Result<Vec<Transaction>, LedgerError> {
    let mut txs = store.transactions_for_user(user_id).await?;
    txs.reverse();
    Ok(txs)
}

pub async fn platform_stats<S: LedgerStore>(store: &S) -> Result<PlatformStats, LedgerError> {
    store.platform_stats().await
}
