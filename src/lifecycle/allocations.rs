use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{BalanceGuard, Commit, LedgerStore, RecordWrite};
use crate::errors::LedgerError;
use crate::ledger::{ledger_entry, with_conflict_retry, LedgerWriter};
use crate::models::{AllocationStatus, CopyAllocation, Strategy, TransactionKind};

use super::locks::KeyedLocks;

#[derive(Debug, Clone)]
pub enum AllocationOutcome {
    Credited {
        allocation: CopyAllocation,
        amount: Decimal,
    },
    /// Balance fell below the allocated amount; a zero-amount notice was
    /// recorded and the allocation stopped.
    Deactivated {
        allocation: CopyAllocation,
        balance: Decimal,
    },
    /// Strategy paid nothing this period. The period is still marked.
    NoProfit(CopyAllocation),
    NotActive(AllocationStatus),
}

/// Copy-trading allocations: `active <-> inactive`, re-validated against the
/// owner's balance every cycle.
#[derive(Clone)]
pub struct AllocationManager<S> {
    ledger: LedgerWriter<S>,
    locks: KeyedLocks,
}

impl<S: LedgerStore> AllocationManager<S> {
    pub fn new(ledger: LedgerWriter<S>) -> Self {
        Self {
            ledger,
            locks: KeyedLocks::new(),
        }
    }

    async fn active_strategy(&self, strategy_id: Uuid) -> Result<Strategy, LedgerError> {
        match self.ledger.store().get_strategy(strategy_id).await? {
            Some(s) if s.is_active => Ok(s),
            _ => Err(LedgerError::StrategyUnavailable(strategy_id)),
        }
    }

    async fn load(&self, allocation_id: Uuid) -> Result<CopyAllocation, LedgerError> {
        self.ledger
            .store()
            .get_allocation(allocation_id)
            .await?
            .ok_or(LedgerError::AllocationNotFound(allocation_id))
    }

    pub async fn create_allocation(
        &self,
        user_id: Uuid,
        strategy_id: Uuid,
        amount: Decimal,
    ) -> Result<CopyAllocation, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "allocation must be positive, got {amount}"
            )));
        }
        let strategy = self.active_strategy(strategy_id).await?;
        let allocation = CopyAllocation::new(user_id, strategy_id, amount, Utc::now());

        let committed = with_conflict_retry(self.ledger.retry_policy(), "create_allocation", || {
            self.ledger.commit(
                Commit::default()
                    .guard(BalanceGuard { user_id, minimum: amount })
                    .write(RecordWrite::InsertAllocation(allocation.clone())),
            )
        })
        .await;

        let stored = match committed {
            Ok(committed) => committed.allocations.into_iter().next().ok_or_else(|| {
                LedgerError::Store(anyhow::anyhow!("commit returned no allocation"))
            })?,
            Err(LedgerError::Timeout(ms)) => {
                let landed = self.ledger.store().get_allocation(allocation.id).await?;
                let Some(stored) = landed else {
                    return Err(LedgerError::Timeout(ms));
                };
                tracing::warn!(
                    allocation_id = %stored.id,
                    timeout_ms = ms,
                    "Allocation commit outlived its timeout but was applied"
                );
                stored
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            allocation_id = %stored.id,
            user_id = %user_id,
            strategy = %strategy.name,
            amount = %amount,
            "Copy-trading allocation created"
        );
        Ok(stored)
    }

    /// User-initiated stop.
    pub async fn stop_allocation(&self, allocation_id: Uuid) -> Result<CopyAllocation, LedgerError> {
        let _guard = self.locks.acquire(allocation_id).await;
        with_conflict_retry(self.ledger.retry_policy(), "stop_allocation", move || async move {
            let current = self.load(allocation_id).await?;
            let mut next = current.clone();
            next.transition(AllocationStatus::Inactive)?;
            self.write(Commit::default(), next, current.version).await
        })
        .await
    }

    /// Reactivate after re-checking the strategy and the owner's balance.
    pub async fn resume_allocation(&self, allocation_id: Uuid) -> Result<CopyAllocation, LedgerError> {
        let _guard = self.locks.acquire(allocation_id).await;
        with_conflict_retry(self.ledger.retry_policy(), "resume_allocation", move || async move {
            let current = self.load(allocation_id).await?;
            let mut next = current.clone();
            next.transition(AllocationStatus::Active)?;
            self.active_strategy(current.strategy_id).await?;

            let guard = BalanceGuard {
                user_id: current.user_id,
                minimum: current.allocated_amount,
            };
            self.write(Commit::default().guard(guard), next, current.version)
                .await
        })
        .await
    }

    /// Apply at most one period of strategy profit to an allocation.
    pub async fn accrue(
        &self,
        allocation_id: Uuid,
        period: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome, LedgerError> {
        let _guard = self.locks.acquire(allocation_id).await;
        with_conflict_retry(self.ledger.retry_policy(), "accrue_allocation", move || {
            self.try_accrue(allocation_id, period, now)
        })
        .await
    }

    async fn try_accrue(
        &self,
        allocation_id: Uuid,
        period: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome, LedgerError> {
        let current = self.load(allocation_id).await?;
        if current.status != AllocationStatus::Active {
            return Ok(AllocationOutcome::NotActive(current.status));
        }
        if current.already_processed(period) {
            return Err(LedgerError::AlreadyProcessedForPeriod {
                id: allocation_id,
                period,
            });
        }

        let balance = self
            .ledger
            .store()
            .get_user(current.user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(current.user_id))?
            .balance;
        if balance < current.allocated_amount {
            return self.deactivate(current, balance, period).await;
        }

        let strategy = self.active_strategy(current.strategy_id).await?;
        let profit = current
            .allocated_amount
            .checked_mul(strategy.daily_rate)
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "profit at rate {} on {} is out of range",
                    strategy.daily_rate, current.allocated_amount
                ))
            })?;

        let mut next = current.clone();
        next.last_distributed_period = Some(period);
        if profit <= Decimal::ZERO {
            let stored = self.write(Commit::default(), next, current.version).await?;
            return Ok(AllocationOutcome::NoProfit(stored));
        }

        next.total_earned += profit;
        next.last_profit_at = Some(now);
        let commit = Commit::default()
            .guard(BalanceGuard {
                user_id: current.user_id,
                minimum: current.allocated_amount,
            })
            .entry(ledger_entry(
                current.user_id,
                TransactionKind::CopyTradingReturn,
                profit,
                format!("Copy trading profit from {} ({period})", strategy.name),
                None,
                Some(current.id),
            )?);

        match self.write(commit, next, current.version).await {
            Ok(allocation) => {
                tracing::debug!(
                    allocation_id = %allocation.id,
                    credited = %profit,
                    total_earned = %allocation.total_earned,
                    "Allocation accrued"
                );
                Ok(AllocationOutcome::Credited {
                    allocation,
                    amount: profit,
                })
            }
            // Balance moved between the read and the locked check.
            Err(LedgerError::InsufficientBalance { available, .. }) => {
                self.deactivate(current, available, period).await
            }
            Err(e) => Err(e),
        }
    }

    async fn deactivate(
        &self,
        current: CopyAllocation,
        balance: Decimal,
        period: NaiveDate,
    ) -> Result<AllocationOutcome, LedgerError> {
        let mut next = current.clone();
        next.transition(AllocationStatus::Inactive)?;
        next.last_distributed_period = Some(period);

        let notice = ledger_entry(
            current.user_id,
            TransactionKind::Notice,
            Decimal::ZERO,
            format!(
                "Copy trading stopped: balance {balance} is below allocated amount {}",
                current.allocated_amount
            ),
            None,
            Some(current.id),
        )?;
        let allocation = self
            .write(Commit::default().entry(notice), next, current.version)
            .await?;

        counter!("allocations_deactivated_total").increment(1);
        tracing::warn!(
            allocation_id = %allocation.id,
            user_id = %allocation.user_id,
            balance = %balance,
            allocated = %allocation.allocated_amount,
            "Copy-trading allocation deactivated for insufficient balance"
        );
        Ok(AllocationOutcome::Deactivated { allocation, balance })
    }

    async fn write(
        &self,
        commit: Commit,
        allocation: CopyAllocation,
        expected_version: i64,
    ) -> Result<CopyAllocation, LedgerError> {
        self.ledger
            .commit(commit.write(RecordWrite::UpdateAllocation {
                allocation,
                expected_version,
            }))
            .await?
            .allocations
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("commit returned no allocation")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::ledger::RetryPolicy;
    use crate::models::Transaction;

    struct Fixture {
        manager: AllocationManager<MemoryStore>,
        ledger: LedgerWriter<MemoryStore>,
        user: Uuid,
        strategy: Uuid,
    }

    async fn fixture(balance: i64, rate: Decimal) -> Fixture {
        let ledger = LedgerWriter::new(MemoryStore::new(), RetryPolicy::default());
        let user = ledger.store().create_user(None).await.unwrap().id;
        ledger.deposit(user, Decimal::from(balance)).await.unwrap();
        let strategy = ledger
            .store()
            .upsert_strategy(Strategy {
                id: Uuid::new_v4(),
                name: "Momentum".into(),
                daily_rate: rate,
                is_active: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap()
            .id;
        Fixture {
            manager: AllocationManager::new(ledger.clone()),
            ledger,
            user,
            strategy,
        }
    }

    async fn history(f: &Fixture) -> Vec<Transaction> {
        f.ledger.store().transactions_for_user(f.user).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_balance_and_live_strategy() {
        let f = fixture(100, Decimal::new(1, 2)).await;
        let err = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(101))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let err = f
            .manager
            .create_allocation(f.user, Uuid::new_v4(), Decimal::from(50))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StrategyUnavailable(_)));

        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(100))
            .await
            .unwrap();
        assert_eq!(alloc.status, AllocationStatus::Active);
        // Allocation does not move the balance.
        assert_eq!(history(&f).await.len(), 1);
    }

    #[tokio::test]
    async fn test_accrual_credits_live_rate_once_per_period() {
        let f = fixture(1_000, Decimal::new(1, 2)).await;
        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(200))
            .await
            .unwrap();
        let now = Utc::now();
        let period = now.date_naive();

        let outcome = f.manager.accrue(alloc.id, period, now).await.unwrap();
        let AllocationOutcome::Credited { allocation, amount } = outcome else {
            panic!("expected credit, got {outcome:?}");
        };
        assert_eq!(amount, Decimal::from(2));
        assert_eq!(allocation.total_earned, Decimal::from(2));

        let err = f.manager.accrue(alloc.id, period, now).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessedForPeriod { .. }));
        let user = f.ledger.store().get_user(f.user).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::from(1_002));
    }

    #[tokio::test]
    async fn test_low_balance_deactivates_with_notice() {
        let f = fixture(200, Decimal::new(1, 2)).await;
        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(200))
            .await
            .unwrap();
        f.ledger.withdraw(f.user, Decimal::from(50)).await.unwrap();

        let now = Utc::now();
        let outcome = f.manager.accrue(alloc.id, now.date_naive(), now).await.unwrap();
        let AllocationOutcome::Deactivated { allocation, balance } = outcome else {
            panic!("expected deactivation, got {outcome:?}");
        };
        assert_eq!(balance, Decimal::from(150));
        assert_eq!(allocation.status, AllocationStatus::Inactive);
        assert_eq!(allocation.total_earned, Decimal::ZERO);

        let txs = history(&f).await;
        let notice = txs.last().unwrap();
        assert_eq!(notice.kind, TransactionKind::Notice);
        assert!(notice.amount.is_zero());
        assert_eq!(notice.linked_allocation_id, Some(alloc.id));
    }

    #[tokio::test]
    async fn test_stop_and_resume() {
        let f = fixture(300, Decimal::new(1, 2)).await;
        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(200))
            .await
            .unwrap();

        let stopped = f.manager.stop_allocation(alloc.id).await.unwrap();
        assert_eq!(stopped.status, AllocationStatus::Inactive);
        assert!(matches!(
            f.manager.stop_allocation(alloc.id).await,
            Err(LedgerError::IllegalTransition { .. })
        ));

        f.ledger.withdraw(f.user, Decimal::from(150)).await.unwrap();
        assert!(matches!(
            f.manager.resume_allocation(alloc.id).await,
            Err(LedgerError::InsufficientBalance { .. })
        ));

        f.ledger.deposit(f.user, Decimal::from(100)).await.unwrap();
        let resumed = f.manager.resume_allocation(alloc.id).await.unwrap();
        assert_eq!(resumed.status, AllocationStatus::Active);
    }

    #[tokio::test]
    async fn test_inactive_strategy_fails_item() {
        let f = fixture(500, Decimal::new(1, 2)).await;
        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(100))
            .await
            .unwrap();
        let mut strategy = f.ledger.store().get_strategy(f.strategy).await.unwrap().unwrap();
        strategy.is_active = false;
        f.ledger.store().upsert_strategy(strategy).await.unwrap();

        let now = Utc::now();
        let err = f.manager.accrue(alloc.id, now.date_naive(), now).await.unwrap_err();
        assert!(matches!(err, LedgerError::StrategyUnavailable(_)));
    }

    #[tokio::test]
    async fn test_zero_rate_marks_period_without_credit() {
        let f = fixture(500, Decimal::ZERO).await;
        let alloc = f
            .manager
            .create_allocation(f.user, f.strategy, Decimal::from(100))
            .await
            .unwrap();
        let now = Utc::now();
        let outcome = f.manager.accrue(alloc.id, now.date_naive(), now).await.unwrap();
        assert!(matches!(outcome, AllocationOutcome::NoProfit(_)));
        assert_eq!(history(&f).await.len(), 1);
    }
}
