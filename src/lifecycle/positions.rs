use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{Commit, LedgerStore, RecordWrite};
use crate::errors::LedgerError;
use crate::ledger::{ledger_entry, with_conflict_retry, LedgerWriter};
use crate::models::{
    DistributionEvent, PlanSnapshot, Position, PositionStatus, Transaction, TransactionKind,
};

use super::locks::KeyedLocks;

/// What happens to principal when a position completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrincipalPolicy {
    /// Credit the principal back in the commit that completes the position.
    #[default]
    ReturnOnCompletion,
    /// Leave it with the platform until a manual withdrawal flow releases it.
    Hold,
}

impl FromStr for PrincipalPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "return_on_completion" | "return" => Ok(PrincipalPolicy::ReturnOnCompletion),
            "hold" => Ok(PrincipalPolicy::Hold),
            other => Err(anyhow::anyhow!("unknown principal policy: {other}")),
        }
    }
}

impl fmt::Display for PrincipalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalPolicy::ReturnOnCompletion => write!(f, "return_on_completion"),
            PrincipalPolicy::Hold => write!(f, "hold"),
        }
    }
}

/// Effect of one accrual step on a position.
#[derive(Debug, Clone)]
pub struct PositionAccrual {
    pub position: Position,
    pub credited: Decimal,
    pub completed: bool,
    pub principal_returned: Decimal,
}

#[derive(Debug, Clone)]
pub enum AccrualOutcome {
    Applied(PositionAccrual),
    /// The position left `active` between listing and locking.
    NotActive(PositionStatus),
}

#[derive(Debug, Clone)]
pub struct Cancellation {
    pub position: Position,
    pub refund: Option<Transaction>,
}

/// Drives positions through `active -> completed | cancelled`.
#[derive(Clone)]
pub struct PositionManager<S> {
    ledger: LedgerWriter<S>,
    locks: KeyedLocks,
    principal_policy: PrincipalPolicy,
}

impl<S: LedgerStore> PositionManager<S> {
    pub fn new(ledger: LedgerWriter<S>, principal_policy: PrincipalPolicy) -> Self {
        Self {
            ledger,
            locks: KeyedLocks::new(),
            principal_policy,
        }
    }

    pub fn principal_policy(&self) -> PrincipalPolicy {
        self.principal_policy
    }

    /// Debit the principal and open an active position in one commit.
    pub async fn create_position(
        &self,
        user_id: Uuid,
        plan: PlanSnapshot,
        principal: Decimal,
    ) -> Result<Position, LedgerError> {
        plan.validate()?;
        plan.check_principal(principal)?;

        let position = Position::open(user_id, plan, principal, Utc::now())?;
        let debit = ledger_entry(
            user_id,
            TransactionKind::InvestmentDebit,
            principal,
            format!("Investment in {}", position.plan.name),
            Some(position.id),
            None,
        )?;

        let committed = with_conflict_retry(self.ledger.retry_policy(), "create_position", || {
            self.ledger.commit(
                Commit::default()
                    .entry(debit.clone())
                    .write(RecordWrite::InsertPosition(position.clone())),
            )
        })
        .await;

        let stored = match committed {
            Ok(committed) => committed
                .positions
                .into_iter()
                .next()
                .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("commit returned no position")))?,
            // The store may have committed right before the deadline fired.
            Err(LedgerError::Timeout(ms)) => {
                let landed = self.ledger.store().get_position(position.id).await?;
                let Some(stored) = landed else {
                    return Err(LedgerError::Timeout(ms));
                };
                tracing::warn!(
                    position_id = %stored.id,
                    timeout_ms = ms,
                    "Position commit outlived its timeout but was applied"
                );
                stored
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            position_id = %stored.id,
            user_id = %user_id,
            plan = %stored.plan.name,
            principal = %principal,
            expected_return = %stored.expected_return,
            "Position opened"
        );
        Ok(stored)
    }

    /// Apply at most one period of profit to a position.
    ///
    /// Fails with `AlreadyProcessedForPeriod` when `period` (or a later one)
    /// was already distributed; the check runs under the position lock and
    /// before anything reaches the ledger.
    pub async fn accrue(
        &self,
        position_id: Uuid,
        period: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AccrualOutcome, LedgerError> {
        let _guard = self.locks.acquire(position_id).await;
        with_conflict_retry(self.ledger.retry_policy(), "accrue_position", move || {
            self.try_accrue(position_id, period, now)
        })
        .await
    }

    async fn try_accrue(
        &self,
        position_id: Uuid,
        period: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AccrualOutcome, LedgerError> {
        let current = self
            .ledger
            .store()
            .get_position(position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        if current.status != PositionStatus::Active {
            return Ok(AccrualOutcome::NotActive(current.status));
        }
        if current.already_processed(period) {
            return Err(LedgerError::AlreadyProcessedForPeriod {
                id: position_id,
                period,
            });
        }

        let step = current.plan_accrual(now);
        let mut next = current.clone();
        let mut commit = Commit::default();
        let mut settle_from = None;

        if step.credit > Decimal::ZERO {
            next.accumulated_profit += step.credit;
            next.distribution_history.push(DistributionEvent {
                period,
                amount: step.credit,
                balance_after: Decimal::ZERO,
                transaction_id: None,
                distributed_at: now,
            });
            settle_from = Some(commit.entries.len());
            commit = commit.entry(ledger_entry(
                current.user_id,
                TransactionKind::InvestmentReturn,
                step.credit,
                format!("Daily return from {} ({period})", current.plan.name),
                Some(current.id),
                None,
            )?);
        }
        next.last_distributed_period = Some(period);

        let mut principal_returned = Decimal::ZERO;
        if step.completes {
            next.transition(PositionStatus::Completed)?;
            next.completed_at = Some(now);
            if self.principal_policy == PrincipalPolicy::ReturnOnCompletion {
                principal_returned = current.principal;
                commit = commit.entry(ledger_entry(
                    current.user_id,
                    TransactionKind::PrincipalReturn,
                    current.principal,
                    format!("Principal returned from {}", current.plan.name),
                    Some(current.id),
                    None,
                )?);
            }
        }

        let committed = self
            .ledger
            .commit(commit.write(RecordWrite::UpdatePosition {
                position: next,
                expected_version: current.version,
                settle_history_from: settle_from,
            }))
            .await?;

        let position = committed
            .positions
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("commit returned no position")))?;

        if step.completes {
            counter!("positions_completed_total").increment(1);
            tracing::info!(
                position_id = %position.id,
                user_id = %position.user_id,
                accumulated_profit = %position.accumulated_profit,
                expected_return = %position.expected_return,
                principal_returned = %principal_returned,
                "Position completed"
            );
        } else {
            tracing::debug!(
                position_id = %position.id,
                credited = %step.credit,
                accumulated_profit = %position.accumulated_profit,
                "Position accrued"
            );
        }

        Ok(AccrualOutcome::Applied(PositionAccrual {
            position,
            credited: step.credit,
            completed: step.completes,
            principal_returned,
        }))
    }

    /// Cancel an active position, refunding `refund_fraction` of principal.
    /// `cancelled` is terminal.
    pub async fn cancel_position(
        &self,
        position_id: Uuid,
        refund_fraction: Decimal,
    ) -> Result<Cancellation, LedgerError> {
        if refund_fraction < Decimal::ZERO || refund_fraction > Decimal::ONE {
            return Err(LedgerError::InvalidAmount(format!(
                "refund fraction must be within 0..=1, got {refund_fraction}"
            )));
        }

        let _guard = self.locks.acquire(position_id).await;
        with_conflict_retry(self.ledger.retry_policy(), "cancel_position", move || {
            self.try_cancel(position_id, refund_fraction)
        })
        .await
    }

    async fn try_cancel(
        &self,
        position_id: Uuid,
        refund_fraction: Decimal,
    ) -> Result<Cancellation, LedgerError> {
        let current = self
            .ledger
            .store()
            .get_position(position_id)
            .await?
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        let now = Utc::now();
        let mut next = current.clone();
        next.transition(PositionStatus::Cancelled)?;
        next.cancelled_at = Some(now);

        let refund = current.principal * refund_fraction;
        let mut commit = Commit::default();
        if refund > Decimal::ZERO {
            commit = commit.entry(ledger_entry(
                current.user_id,
                TransactionKind::PrincipalReturn,
                refund,
                format!("Refund on cancellation of {}", current.plan.name),
                Some(current.id),
                None,
            )?);
        }

        let committed = self
            .ledger
            .commit(commit.write(RecordWrite::UpdatePosition {
                position: next,
                expected_version: current.version,
                settle_history_from: None,
            }))
            .await?;

        let position = committed
            .positions
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("commit returned no position")))?;

        tracing::info!(
            position_id = %position.id,
            user_id = %position.user_id,
            refund = %refund,
            "Position cancelled"
        );

        Ok(Cancellation {
            position,
            refund: committed.transactions.into_iter().next(),
        })
    }
}
