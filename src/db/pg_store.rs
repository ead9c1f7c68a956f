use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::models::{CopyAllocation, Position, Strategy, Transaction, User};
use crate::query::PlatformStats;

use super::{
    allocation_repo, position_repo, settle_balances, settle_history, strategy_repo,
    transaction_repo, user_repo, Commit, Committed, LedgerStore, RecordWrite,
};

/// Postgres-backed store. Each commit runs in one database transaction with
/// the affected user rows locked `FOR UPDATE` in id order.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_conflict_code(code: Option<&str>) -> bool {
    // serialization_failure, deadlock_detected
    matches!(code, Some("40001") | Some("40P01"))
}

/// Map repo errors, surfacing lock conflicts buried in the chain as
/// retryable `ConcurrencyConflict`.
fn classify(error: anyhow::Error) -> LedgerError {
    let conflict = error.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db| is_conflict_code(db.code().as_deref()))
    });
    if conflict {
        LedgerError::ConcurrencyConflict(error.to_string())
    } else {
        LedgerError::Store(error)
    }
}

impl LedgerStore for PgStore {
    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, email: Option<String>) -> Result<User, LedgerError> {
        user_repo::insert_user(&self.pool, email.as_deref())
            .await
            .map_err(classify)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, LedgerError> {
        user_repo::get_user(&self.pool, user_id).await.map_err(classify)
    }

    async fn commit(&self, commit: Commit) -> Result<Committed, LedgerError> {
        // Dropping `tx` on any early return rolls the whole commit back.
        let mut tx = self.pool.begin().await?;

        let users = commit.touched_users();
        let locked = user_repo::lock_balances(&mut tx, &users).await?;
        let mut balances: HashMap<Uuid, Decimal> = locked.into_iter().collect();
        let moves = settle_balances(&mut balances, &commit)?;

        let mut committed = Committed::default();

        for (entry, (before, after)) in commit.entries.iter().zip(moves) {
            let row = transaction_repo::insert_transaction(&mut tx, entry, before, after)
                .await
                .map_err(classify)?;
            committed.transactions.push(row);
        }

        for (user_id, balance) in &balances {
            user_repo::set_balance(&mut tx, *user_id, *balance).await?;
        }

        for write in commit.writes {
            match write {
                RecordWrite::InsertPosition(position) => {
                    let stored = position_repo::insert_position(&mut tx, &position)
                        .await
                        .map_err(classify)?;
                    committed.positions.push(stored);
                }
                RecordWrite::UpdatePosition {
                    mut position,
                    expected_version,
                    settle_history_from,
                } => {
                    if let Some(t) = settle_history_from.and_then(|i| committed.transactions.get(i)) {
                        settle_history(&mut position, t);
                    }
                    let stored =
                        position_repo::update_position_versioned(&mut tx, &position, expected_version)
                            .await
                            .map_err(classify)?
                            .ok_or_else(|| {
                                LedgerError::ConcurrencyConflict(format!(
                                    "position {} changed since version {expected_version}",
                                    position.id
                                ))
                            })?;
                    committed.positions.push(stored);
                }
                RecordWrite::InsertAllocation(allocation) => {
                    let stored = allocation_repo::insert_allocation(&mut tx, &allocation)
                        .await
                        .map_err(classify)?;
                    committed.allocations.push(stored);
                }
                RecordWrite::UpdateAllocation { allocation, expected_version } => {
                    let stored = allocation_repo::update_allocation_versioned(
                        &mut tx,
                        &allocation,
                        expected_version,
                    )
                    .await
                    .map_err(classify)?
                    .ok_or_else(|| {
                        LedgerError::ConcurrencyConflict(format!(
                            "allocation {} changed since version {expected_version}",
                            allocation.id
                        ))
                    })?;
                    committed.allocations.push(stored);
                }
            }
        }

        tx.commit().await?;
        Ok(committed)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        transaction_repo::get_transactions_for_user(&self.pool, user_id)
            .await
            .map_err(classify)
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, LedgerError> {
        position_repo::get_position(&self.pool, id).await.map_err(classify)
    }

    async fn positions_for_user(&self, user_id: Uuid) -> Result<Vec<Position>, LedgerError> {
        position_repo::get_positions_for_user(&self.pool, user_id)
            .await
            .map_err(classify)
    }

    async fn active_positions_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Position>, LedgerError> {
        position_repo::get_active_positions_after(&self.pool, after, limit)
            .await
            .map_err(classify)
    }

    async fn get_allocation(&self, id: Uuid) -> Result<Option<CopyAllocation>, LedgerError> {
        allocation_repo::get_allocation(&self.pool, id)
            .await
            .map_err(classify)
    }

    async fn allocations_for_user(&self, user_id: Uuid) -> Result<Vec<CopyAllocation>, LedgerError> {
        allocation_repo::get_allocations_for_user(&self.pool, user_id)
            .await
            .map_err(classify)
    }

    async fn active_allocations_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<CopyAllocation>, LedgerError> {
        allocation_repo::get_active_allocations_after(&self.pool, after, limit)
            .await
            .map_err(classify)
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, LedgerError> {
        strategy_repo::get_strategy(&self.pool, id)
            .await
            .map_err(classify)
    }

    async fn upsert_strategy(&self, strategy: Strategy) -> Result<Strategy, LedgerError> {
        strategy_repo::upsert_strategy(&self.pool, &strategy)
            .await
            .map_err(classify)
    }

    async fn platform_stats(&self) -> Result<PlatformStats, LedgerError> {
        let (total_users, total_balance) =
            user_repo::balance_totals(&self.pool).await.map_err(classify)?;
        let positions = position_repo::position_totals(&self.pool)
            .await
            .map_err(classify)?;
        let allocations = allocation_repo::allocation_totals(&self.pool)
            .await
            .map_err(classify)?;
        let transaction_count = transaction_repo::count_transactions(&self.pool)
            .await
            .map_err(classify)?;

        Ok(PlatformStats {
            total_users,
            total_balance,
            active_positions: positions.active,
            completed_positions: positions.completed,
            cancelled_positions: positions.cancelled,
            active_principal: positions.active_principal,
            total_profit_paid: positions.profit_paid,
            active_allocations: allocations.active,
            total_allocated: allocations.allocated,
            copy_trading_earned: allocations.earned,
            transaction_count,
        })
    }
}
