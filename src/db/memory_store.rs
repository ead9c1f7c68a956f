use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::models::{
    AllocationStatus, CopyAllocation, Position, PositionStatus, Strategy, Transaction,
    TransactionStatus, User,
};
use crate::query::PlatformStats;

use super::{settle_balances, settle_history, Commit, Committed, LedgerStore, RecordWrite};

/// In-process store with the same commit semantics as [`super::PgStore`].
///
/// A single mutex serializes every commit, which is stricter than the
/// per-user locking Postgres gives but preserves the same observable
/// guarantees. Used by tests and database-less local runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    transactions: Vec<Transaction>,
    positions: BTreeMap<Uuid, Position>,
    allocations: BTreeMap<Uuid, CopyAllocation>,
    strategies: HashMap<Uuid, Strategy>,
    next_seq: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(current: Option<i64>, expected: i64, what: &str, id: Uuid) -> Result<(), LedgerError> {
    match current {
        None => Err(LedgerError::ConcurrencyConflict(format!("{what} {id} vanished"))),
        Some(v) if v != expected => Err(LedgerError::ConcurrencyConflict(format!(
            "{what} {id} at version {v}, expected {expected}"
        ))),
        Some(_) => Ok(()),
    }
}

impl LedgerStore for MemoryStore {
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn create_user(&self, email: Option<String>) -> Result<User, LedgerError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().await.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, LedgerError> {
        Ok(self.inner.lock().await.users.get(&user_id).cloned())
    }

    async fn commit(&self, commit: Commit) -> Result<Committed, LedgerError> {
        let mut state = self.inner.lock().await;

        // Validate everything against a scratch copy before touching state.
        let mut balances: HashMap<Uuid, Decimal> = commit
            .touched_users()
            .into_iter()
            .filter_map(|id| state.users.get(&id).map(|u| (id, u.balance)))
            .collect();
        let moves = settle_balances(&mut balances, &commit)?;

        for write in &commit.writes {
            match write {
                RecordWrite::InsertPosition(p) if state.positions.contains_key(&p.id) => {
                    return Err(LedgerError::ConcurrencyConflict(format!(
                        "position {} already exists",
                        p.id
                    )));
                }
                RecordWrite::InsertAllocation(a) if state.allocations.contains_key(&a.id) => {
                    return Err(LedgerError::ConcurrencyConflict(format!(
                        "allocation {} already exists",
                        a.id
                    )));
                }
                RecordWrite::UpdatePosition { position, expected_version, .. } => check_version(
                    state.positions.get(&position.id).map(|p| p.version),
                    *expected_version,
                    "position",
                    position.id,
                )?,
                RecordWrite::UpdateAllocation { allocation, expected_version } => check_version(
                    state.allocations.get(&allocation.id).map(|a| a.version),
                    *expected_version,
                    "allocation",
                    allocation.id,
                )?,
                _ => {}
            }
        }

        let now = Utc::now();
        let mut committed = Committed::default();

        for (entry, (before, after)) in commit.entries.iter().zip(moves) {
            state.next_seq += 1;
            let tx = Transaction {
                id: Uuid::new_v4(),
                seq: state.next_seq,
                user_id: entry.user_id,
                kind: entry.kind,
                amount: entry.amount,
                status: TransactionStatus::Completed,
                description: entry.description.clone(),
                balance_before: before,
                balance_after: after,
                linked_position_id: entry.linked_position_id,
                linked_allocation_id: entry.linked_allocation_id,
                created_at: now,
            };
            state.transactions.push(tx.clone());
            committed.transactions.push(tx);
        }

        for (user_id, balance) in balances {
            if let Some(user) = state.users.get_mut(&user_id) {
                if user.balance != balance {
                    user.balance = balance;
                    user.updated_at = now;
                }
            }
        }

        for write in commit.writes {
            match write {
                RecordWrite::InsertPosition(position) => {
                    state.positions.insert(position.id, position.clone());
                    committed.positions.push(position);
                }
                RecordWrite::UpdatePosition {
                    mut position,
                    expected_version,
                    settle_history_from,
                } => {
                    if let Some(tx) = settle_history_from.and_then(|i| committed.transactions.get(i)) {
                        settle_history(&mut position, tx);
                    }
                    position.version = expected_version + 1;
                    state.positions.insert(position.id, position.clone());
                    committed.positions.push(position);
                }
                RecordWrite::InsertAllocation(allocation) => {
                    state.allocations.insert(allocation.id, allocation.clone());
                    committed.allocations.push(allocation);
                }
                RecordWrite::UpdateAllocation { mut allocation, expected_version } => {
                    allocation.version = expected_version + 1;
                    state.allocations.insert(allocation.id, allocation.clone());
                    committed.allocations.push(allocation);
                }
            }
        }

        Ok(committed)
    }

    async fn transactions_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.inner.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_position(&self, id: Uuid) -> Result<Option<Position>, LedgerError> {
        Ok(self.inner.lock().await.positions.get(&id).cloned())
    }

    async fn positions_for_user(&self, user_id: Uuid) -> Result<Vec<Position>, LedgerError> {
        let state = self.inner.lock().await;
        let mut positions: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(positions)
    }

    async fn active_positions_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Position>, LedgerError> {
        let state = self.inner.lock().await;
        Ok(state
            .positions
            .values()
            .filter(|p| after.map_or(true, |a| p.id > a))
            .filter(|p| p.status == PositionStatus::Active)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_allocation(&self, id: Uuid) -> Result<Option<CopyAllocation>, LedgerError> {
        Ok(self.inner.lock().await.allocations.get(&id).cloned())
    }

    async fn allocations_for_user(&self, user_id: Uuid) -> Result<Vec<CopyAllocation>, LedgerError> {
        let state = self.inner.lock().await;
        let mut allocations: Vec<CopyAllocation> = state
            .allocations
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        allocations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(allocations)
    }

    async fn active_allocations_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<CopyAllocation>, LedgerError> {
        let state = self.inner.lock().await;
        Ok(state
            .allocations
            .values()
            .filter(|a| after.map_or(true, |x| a.id > x))
            .filter(|a| a.status == AllocationStatus::Active)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_strategy(&self, id: Uuid) -> Result<Option<Strategy>, LedgerError> {
        Ok(self.inner.lock().await.strategies.get(&id).cloned())
    }

    async fn upsert_strategy(&self, strategy: Strategy) -> Result<Strategy, LedgerError> {
        self.inner
            .lock()
            .await
            .strategies
            .insert(strategy.id, strategy.clone());
        Ok(strategy)
    }

    async fn platform_stats(&self) -> Result<PlatformStats, LedgerError> {
        let state = self.inner.lock().await;
        let mut stats = PlatformStats {
            total_users: state.users.len() as i64,
            total_balance: state.users.values().map(|u| u.balance).sum(),
            transaction_count: state.transactions.len() as i64,
            ..PlatformStats::default()
        };

        for p in state.positions.values() {
            stats.total_profit_paid += p.accumulated_profit;
            match p.status {
                PositionStatus::Active => {
                    stats.active_positions += 1;
                    stats.active_principal += p.principal;
                }
                PositionStatus::Completed => stats.completed_positions += 1,
                PositionStatus::Cancelled => stats.cancelled_positions += 1,
            }
        }

        for a in state.allocations.values() {
            stats.copy_trading_earned += a.total_earned;
            if a.status == AllocationStatus::Active {
                stats.active_allocations += 1;
                stats.total_allocated += a.allocated_amount;
            }
        }

        Ok(stats)
    }
}
