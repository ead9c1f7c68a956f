use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{Commit, Committed, LedgerEntry, LedgerStore};
use crate::errors::LedgerError;
use crate::models::{Direction, Transaction, TransactionKind};

use super::retry::{with_conflict_retry, RetryPolicy};

/// Turn a caller-supplied magnitude into a signed ledger entry.
///
/// Credit and debit kinds take a positive magnitude and derive the sign from
/// the kind. Adjustments are signed by the caller. Notices must be zero, and
/// zero is rejected for everything else.
pub fn ledger_entry(
    user_id: Uuid,
    kind: TransactionKind,
    amount: Decimal,
    description: impl Into<String>,
    linked_position_id: Option<Uuid>,
    linked_allocation_id: Option<Uuid>,
) -> Result<LedgerEntry, LedgerError> {
    let signed = match kind.direction() {
        Direction::None if amount.is_zero() => Decimal::ZERO,
        Direction::None => {
            return Err(LedgerError::InvalidAmount(format!(
                "{kind} records must carry a zero amount, got {amount}"
            )))
        }
        _ if amount.is_zero() => {
            return Err(LedgerError::InvalidAmount(format!("zero amount for {kind}")))
        }
        Direction::Credit | Direction::Debit if amount.is_sign_negative() => {
            return Err(LedgerError::InvalidAmount(format!(
                "{kind} takes a positive magnitude, got {amount}"
            )))
        }
        Direction::Credit | Direction::Either => amount,
        Direction::Debit => -amount,
    };

    Ok(LedgerEntry {
        user_id,
        kind,
        amount: signed,
        description: description.into(),
        linked_position_id,
        linked_allocation_id,
    })
}

/// The single path through which balances change.
///
/// Every mutation is a [`Commit`] handed to the store, which applies it
/// atomically under the owning users' locks. The writer adds the per-commit
/// timeout, bounded conflict retry and bookkeeping; it never triggers
/// further business logic.
#[derive(Clone)]
pub struct LedgerWriter<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: LedgerStore> LedgerWriter<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Append one transaction and move the balance accordingly.
    pub async fn apply_transaction(
        &self,
        user_id: Uuid,
        kind: TransactionKind,
        amount: Decimal,
        description: &str,
        linked_position_id: Option<Uuid>,
    ) -> Result<Transaction, LedgerError> {
        let entry = ledger_entry(user_id, kind, amount, description, linked_position_id, None)?;

        let committed = with_conflict_retry(&self.retry, "apply_transaction", || {
            self.commit(Commit::default().entry(entry.clone()))
        })
        .await?;

        let tx = committed
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("commit returned no transaction")))?;

        tracing::info!(
            user_id = %user_id,
            kind = %kind,
            amount = %tx.amount,
            balance_after = %tx.balance_after,
            "Ledger transaction applied"
        );
        Ok(tx)
    }

    pub async fn deposit(&self, user_id: Uuid, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.apply_transaction(user_id, TransactionKind::Deposit, amount, "Deposit", None)
            .await
    }

    pub async fn withdraw(&self, user_id: Uuid, amount: Decimal) -> Result<Transaction, LedgerError> {
        self.apply_transaction(user_id, TransactionKind::Withdrawal, amount, "Withdrawal", None)
            .await
    }

    /// Apply a composite commit once, bounded by the configured timeout.
    ///
    /// A timed-out commit is dropped, which rolls back an open store
    /// transaction. If the deadline fires after the database has already
    /// accepted the COMMIT, the effect is durable but the caller still gets
    /// `Timeout`; callers that know the id they inserted look it up before
    /// reporting failure.
    pub async fn commit(&self, commit: Commit) -> Result<Committed, LedgerError> {
        let timeout = self.retry.timeout;
        let committed = tokio::time::timeout(timeout, self.store.commit(commit))
            .await
            .map_err(|_| LedgerError::Timeout(timeout.as_millis() as u64))??;

        for tx in &committed.transactions {
            counter!("ledger_transactions_total", "kind" => tx.kind.as_str()).increment(1);
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn writer() -> LedgerWriter<MemoryStore> {
        LedgerWriter::new(MemoryStore::new(), RetryPolicy::default())
    }

    #[test]
    fn test_entry_signs_follow_kind() {
        let user = Uuid::new_v4();
        let debit =
            ledger_entry(user, TransactionKind::Withdrawal, Decimal::from(5), "w", None, None).unwrap();
        assert_eq!(debit.amount, Decimal::from(-5));

        let credit =
            ledger_entry(user, TransactionKind::Deposit, Decimal::from(5), "d", None, None).unwrap();
        assert_eq!(credit.amount, Decimal::from(5));

        let adj =
            ledger_entry(user, TransactionKind::Adjustment, Decimal::from(-3), "a", None, None).unwrap();
        assert_eq!(adj.amount, Decimal::from(-3));
    }

    #[test]
    fn test_entry_rejects_zero_except_notice() {
        let user = Uuid::new_v4();
        assert!(matches!(
            ledger_entry(user, TransactionKind::Deposit, Decimal::ZERO, "d", None, None),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(ledger_entry(user, TransactionKind::Notice, Decimal::ZERO, "n", None, None).is_ok());
        assert!(ledger_entry(user, TransactionKind::Notice, Decimal::ONE, "n", None, None).is_err());
        assert!(
            ledger_entry(user, TransactionKind::Withdrawal, Decimal::from(-1), "w", None, None).is_err()
        );
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw_chains_balances() {
        let w = writer();
        let user = w.store().create_user(None).await.unwrap();

        let dep = w.deposit(user.id, Decimal::from(1_000)).await.unwrap();
        assert_eq!(dep.balance_before, Decimal::ZERO);
        assert_eq!(dep.balance_after, Decimal::from(1_000));

        let wd = w.withdraw(user.id, Decimal::from(300)).await.unwrap();
        assert_eq!(wd.balance_before, Decimal::from(1_000));
        assert_eq!(wd.balance_after, Decimal::from(700));
        assert_eq!(wd.amount, Decimal::from(-300));

        let stored = w.store().get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::from(700));
    }

    #[tokio::test]
    async fn test_overdraft_rejected_without_side_effects() {
        let w = writer();
        let user = w.store().create_user(None).await.unwrap();
        w.deposit(user.id, Decimal::from(100)).await.unwrap();

        let err = w.withdraw(user.id, Decimal::from(101)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let txs = w.store().transactions_for_user(user.id).await.unwrap();
        assert_eq!(txs.len(), 1);
        let stored = w.store().get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let w = writer();
        let err = w.deposit(Uuid::new_v4(), Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
    }
}
