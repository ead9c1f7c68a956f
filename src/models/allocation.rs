use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Active,
    Inactive,
}

impl AllocationStatus {
    pub fn can_transition_to(self, next: AllocationStatus) -> bool {
        self != next
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Active => "active",
            AllocationStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AllocationStatus::Active),
            "inactive" => Ok(AllocationStatus::Inactive),
            other => Err(anyhow::anyhow!("unknown allocation status: {other}")),
        }
    }
}

/// Capital mirroring a copy-trading strategy. The allocated amount stays in
/// the user's balance and is re-checked against it every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyAllocation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub strategy_id: Uuid,
    pub allocated_amount: Decimal,
    pub total_earned: Decimal,
    pub status: AllocationStatus,
    pub last_profit_at: Option<DateTime<Utc>>,
    pub last_distributed_period: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl CopyAllocation {
    pub fn new(user_id: Uuid, strategy_id: Uuid, allocated_amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            strategy_id,
            allocated_amount,
            total_earned: Decimal::ZERO,
            status: AllocationStatus::Active,
            last_profit_at: None,
            last_distributed_period: None,
            created_at: now,
            version: 0,
        }
    }

    pub fn already_processed(&self, period: NaiveDate) -> bool {
        self.last_distributed_period.is_some_and(|last| last >= period)
    }

    pub fn transition(&mut self, next: AllocationStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::IllegalTransition {
                entity: "allocation",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
