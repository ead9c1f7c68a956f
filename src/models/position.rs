use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LedgerError;

/// Investment plan terms as seen at the moment a position is opened.
/// Later edits to the plan never reach existing positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub plan_id: Option<Uuid>,
    pub name: String,
    /// Total return over the whole duration, in percent (20 = 20%).
    pub return_pct: Decimal,
    pub duration_days: i64,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
}

impl PlanSnapshot {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.return_pct <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "plan {} return must be positive, got {}%",
                self.name, self.return_pct
            )));
        }
        if self.duration_days <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "plan {} duration must be positive, got {} days",
                self.name, self.duration_days
            )));
        }
        Ok(())
    }

    /// Reject principals outside the plan's configured bounds.
    pub fn check_principal(&self, principal: Decimal) -> Result<(), LedgerError> {
        if principal <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "principal must be positive, got {principal}"
            )));
        }
        if principal < self.min_amount {
            return Err(LedgerError::InvalidAmount(format!(
                "principal {principal} below plan minimum {}",
                self.min_amount
            )));
        }
        if let Some(max) = self.max_amount {
            if principal > max {
                return Err(LedgerError::InvalidAmount(format!(
                    "principal {principal} above plan maximum {max}"
                )));
            }
        }
        Ok(())
    }

    /// Fraction of principal paid per day (20% over 10 days = 0.02).
    pub fn daily_rate(&self) -> Decimal {
        self.return_pct / Decimal::ONE_HUNDRED / Decimal::from(self.duration_days)
    }

    pub fn expected_return(&self, principal: Decimal) -> Result<Decimal, LedgerError> {
        principal
            .checked_mul(self.return_pct)
            .map(|v| v / Decimal::ONE_HUNDRED)
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "return of {}% on {principal} is out of range",
                    self.return_pct
                ))
            })
    }

    /// End of the term for a position opened at `start`.
    pub fn end_date(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, LedgerError> {
        Duration::try_days(self.duration_days)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| {
                LedgerError::InvalidAmount(format!(
                    "plan {} duration of {} days is out of range",
                    self.name, self.duration_days
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Completed,
    Cancelled,
}

impl PositionStatus {
    /// Transition table. `completed` and `cancelled` are terminal.
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        matches!(
            (self, next),
            (PositionStatus::Active, PositionStatus::Completed)
                | (PositionStatus::Active, PositionStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Completed => "completed",
            PositionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PositionStatus::Active),
            "completed" => Ok(PositionStatus::Completed),
            "cancelled" => Ok(PositionStatus::Cancelled),
            other => Err(anyhow::anyhow!("unknown position status: {other}")),
        }
    }
}

/// One profit distribution applied to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionEvent {
    pub period: NaiveDate,
    pub amount: Decimal,
    /// User balance right after the credit; filled in by the store at commit.
    pub balance_after: Decimal,
    pub transaction_id: Option<Uuid>,
    pub distributed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: PlanSnapshot,
    pub principal: Decimal,
    pub daily_rate: Decimal,
    pub expected_return: Decimal,
    pub accumulated_profit: Decimal,
    pub status: PositionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Idempotency key: the last calendar period that received accrual.
    pub last_distributed_period: Option<NaiveDate>,
    pub distribution_history: Vec<DistributionEvent>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

/// What one accrual step would do to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualStep {
    /// Credit to apply, already bounded by the remaining expected return.
    pub credit: Decimal,
    /// Whether the position completes after this step.
    pub completes: bool,
}

impl Position {
    /// Build a fresh active position from a plan snapshot.
    pub fn open(
        user_id: Uuid,
        plan: PlanSnapshot,
        principal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let daily_rate = plan.daily_rate();
        let expected_return = plan.expected_return(principal)?;
        let end_date = plan.end_date(now)?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            plan,
            principal,
            daily_rate,
            expected_return,
            accumulated_profit: Decimal::ZERO,
            status: PositionStatus::Active,
            start_date: now,
            end_date,
            completed_at: None,
            cancelled_at: None,
            last_distributed_period: None,
            distribution_history: Vec::new(),
            version: 0,
        })
    }

    pub fn remaining_return(&self) -> Decimal {
        (self.expected_return - self.accumulated_profit).max(Decimal::ZERO)
    }

    pub fn already_processed(&self, period: NaiveDate) -> bool {
        self.last_distributed_period.is_some_and(|last| last >= period)
    }

    /// Compute the bounded accrual for one period at `now`.
    pub fn plan_accrual(&self, now: DateTime<Utc>) -> AccrualStep {
        let daily_profit = self.principal * self.daily_rate;
        let credit = daily_profit.min(self.remaining_return());
        let reaches_cap = self.accumulated_profit + credit >= self.expected_return;
        AccrualStep {
            credit,
            completes: reaches_cap || now >= self.end_date,
        }
    }

    pub fn transition(&mut self, next: PositionStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::IllegalTransition {
                entity: "position",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whole days left until the scheduled end, zero once closed or past due.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if self.status != PositionStatus::Active || now >= self.end_date {
            return 0;
        }
        let secs = (self.end_date - now).num_seconds();
        (secs + 86_399) / 86_400
    }

    /// Share of the expected return earned so far, in percent.
    pub fn percent_earned(&self) -> Decimal {
        if self.expected_return.is_zero() {
            return Decimal::ZERO;
        }
        (self.accumulated_profit / self.expected_return * Decimal::ONE_HUNDRED).round_dp(2)
    }
}
