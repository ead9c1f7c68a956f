use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Copy-trading strategy owned by the admin workflow. The day rate is read
/// live every cycle, never snapshotted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    /// Fraction of the allocated amount paid per day (0.01 = 1%).
    pub daily_rate: Decimal,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
