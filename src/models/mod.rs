pub mod allocation;
pub mod position;
pub mod strategy;
pub mod transaction;
pub mod user;

pub use allocation::{AllocationStatus, CopyAllocation};
pub use position::{AccrualStep, DistributionEvent, PlanSnapshot, Position, PositionStatus};
pub use strategy::Strategy;
pub use transaction::{Direction, Transaction, TransactionKind, TransactionStatus};
pub use user::User;

use chrono::{DateTime, NaiveDate, Utc};

// ---------------------------------------------------------------------------
// Accrual period
// ---------------------------------------------------------------------------

/// Accrual periods are UTC calendar days.
pub fn period_of(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}
