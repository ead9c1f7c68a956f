pub mod allocation_repo;
pub mod memory_store;
pub mod pg_store;
pub mod position_repo;
pub mod strategy_repo;
pub mod transaction_repo;
pub mod user_repo;

pub use memory_store::MemoryStore;
pub use pg_store::PgStore;

use std::collections::HashMap;
use std::future::Future;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::models::{CopyAllocation, Position, Strategy, Transaction, TransactionKind, User};
use crate::query::PlatformStats;

pub async fn init_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

// ---------------------------------------------------------------------------
// Commit unit
// ---------------------------------------------------------------------------

/// A balance movement to append to the ledger. `amount` is signed.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub linked_position_id: Option<Uuid>,
    pub linked_allocation_id: Option<Uuid>,
}

/// Require `balance >= minimum` for a user, evaluated under the user lock
/// before any entry of the same commit is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceGuard {
    pub user_id: Uuid,
    pub minimum: Decimal,
}

#[derive(Debug, Clone)]
pub enum RecordWrite {
    InsertPosition(Position),
    UpdatePosition {
        position: Position,
        expected_version: i64,
        /// Index of the entry whose resulting balance belongs in the last
        /// distribution-history event.
        settle_history_from: Option<usize>,
    },
    InsertAllocation(CopyAllocation),
    UpdateAllocation {
        allocation: CopyAllocation,
        expected_version: i64,
    },
}

/// Everything one business operation changes. A store applies a commit
/// entirely or not at all.
#[derive(Debug, Clone, Default)]
pub struct Commit {
    pub entries: Vec<LedgerEntry>,
    pub guards: Vec<BalanceGuard>,
    pub writes: Vec<RecordWrite>,
}

impl Commit {
    pub fn entry(mut self, entry: LedgerEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn guard(mut self, guard: BalanceGuard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn write(mut self, write: RecordWrite) -> Self {
        self.writes.push(write);
        self
    }

    /// Users whose rows must be locked, in lock order.
    pub fn touched_users(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .entries
            .iter()
            .map(|e| e.user_id)
            .chain(self.guards.iter().map(|g| g.user_id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Stored state produced by a commit, in the order it was submitted.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub transactions: Vec<Transaction>,
    pub positions: Vec<Position>,
    pub allocations: Vec<CopyAllocation>,
}

/// Check guards and walk the entries against locked balances. Returns the
/// `(before, after)` pair for every entry and leaves the final balances in
/// `balances`. Nothing is persisted here.
pub(crate) fn settle_balances(
    balances: &mut HashMap<Uuid, Decimal>,
    commit: &Commit,
) -> Result<Vec<(Decimal, Decimal)>, LedgerError> {
    for guard in &commit.guards {
        let available = *balances
            .get(&guard.user_id)
            .ok_or(LedgerError::UserNotFound(guard.user_id))?;
        if available < guard.minimum {
            return Err(LedgerError::InsufficientBalance {
                user_id: guard.user_id,
                required: guard.minimum,
                available,
            });
        }
    }

    let mut moves = Vec::with_capacity(commit.entries.len());
    for entry in &commit.entries {
        let balance = balances
            .get_mut(&entry.user_id)
            .ok_or(LedgerError::UserNotFound(entry.user_id))?;
        let before = *balance;
        let after = before.checked_add(entry.amount).ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "balance of user {} would overflow: {before} + {}",
                entry.user_id, entry.amount
            ))
        })?;
        if after < Decimal::ZERO {
            return Err(LedgerError::InsufficientBalance {
                user_id: entry.user_id,
                required: -entry.amount,
                available: before,
            });
        }
        *balance = after;
        moves.push((before, after));
    }
    Ok(moves)
}

/// Copy the resulting balance of the crediting transaction into the newest
/// distribution event of a position.
pub(crate) fn settle_history(position: &mut Position, tx: &Transaction) {
    if let Some(event) = position.distribution_history.last_mut() {
        event.balance_after = tx.balance_after;
        event.transaction_id = Some(tx.id);
    }
}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Persistence used by the engine. Implementations must apply [`Commit`]s
/// atomically, serialize commits touching the same user, and reject
/// position/allocation updates whose `expected_version` is stale with
/// [`LedgerError::ConcurrencyConflict`].
pub trait LedgerStore: Clone + Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn create_user(
        &self,
        email: Option<String>,
    ) -> impl Future<Output = Result<User, LedgerError>> + Send;

    fn get_user(&self, user_id: Uuid)
        -> impl Future<Output = Result<Option<User>, LedgerError>> + Send;

    fn commit(&self, commit: Commit) -> impl Future<Output = Result<Committed, LedgerError>> + Send;

    fn transactions_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Transaction>, LedgerError>> + Send;

    fn get_position(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Position>, LedgerError>> + Send;

    fn positions_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Position>, LedgerError>> + Send;

    /// Active positions ordered by id, strictly after `after`.
    fn active_positions_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Position>, LedgerError>> + Send;

    fn get_allocation(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<CopyAllocation>, LedgerError>> + Send;

    fn allocations_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<CopyAllocation>, LedgerError>> + Send;

    /// Active allocations ordered by id, strictly after `after`.
    fn active_allocations_page(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<CopyAllocation>, LedgerError>> + Send;

    fn get_strategy(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Strategy>, LedgerError>> + Send;

    fn upsert_strategy(
        &self,
        strategy: Strategy,
    ) -> impl Future<Output = Result<Strategy, LedgerError>> + Send;

    fn platform_stats(&self) -> impl Future<Output = Result<PlatformStats, LedgerError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: Uuid, amount: i64) -> LedgerEntry {
        LedgerEntry {
            user_id,
            kind: TransactionKind::Adjustment,
            amount: Decimal::from(amount),
            description: "test".into(),
            linked_position_id: None,
            linked_allocation_id: None,
        }
    }

    #[test]
    fn test_settle_balances_chains_entries() {
        let user = Uuid::new_v4();
        let mut balances = HashMap::from([(user, Decimal::from(100))]);
        let commit = Commit::default().entry(entry(user, -40)).entry(entry(user, 15));

        let moves = settle_balances(&mut balances, &commit).unwrap();
        assert_eq!(moves[0], (Decimal::from(100), Decimal::from(60)));
        assert_eq!(moves[1], (Decimal::from(60), Decimal::from(75)));
        assert_eq!(balances[&user], Decimal::from(75));
    }

    #[test]
    fn test_settle_balances_rejects_overdraft() {
        let user = Uuid::new_v4();
        let mut balances = HashMap::from([(user, Decimal::from(100))]);
        let commit = Commit::default().entry(entry(user, -101));
        assert!(matches!(
            settle_balances(&mut balances, &commit),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_settle_balances_rejects_overflow() {
        let user = Uuid::new_v4();
        let mut balances = HashMap::from([(user, Decimal::MAX)]);
        let commit = Commit::default().entry(entry(user, 1));
        assert!(matches!(
            settle_balances(&mut balances, &commit),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(balances[&user], Decimal::MAX);
    }

    #[test]
    fn test_guard_checked_against_opening_balance() {
        let user = Uuid::new_v4();
        let mut balances = HashMap::from([(user, Decimal::from(150))]);
        let commit = Commit::default()
            .guard(BalanceGuard { user_id: user, minimum: Decimal::from(200) })
            .entry(entry(user, 100));
        assert!(matches!(
            settle_balances(&mut balances, &commit),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_touched_users_sorted_and_unique() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let commit = Commit::default()
            .entry(entry(b, 1))
            .entry(entry(a, 1))
            .guard(BalanceGuard { user_id: b, minimum: Decimal::ONE });
        let users = commit.touched_users();
        assert_eq!(users.len(), 2);
        assert!(users[0] < users[1]);
    }

    #[test]
    fn test_unknown_user_is_reported() {
        let mut balances = HashMap::new();
        let user = Uuid::new_v4();
        let commit = Commit::default().entry(entry(user, 5));
        assert!(matches!(
            settle_balances(&mut balances, &commit),
            Err(LedgerError::UserNotFound(id)) if id == user
        ));
    }
}
