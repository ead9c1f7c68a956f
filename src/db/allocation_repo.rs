use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{AllocationStatus, CopyAllocation};

/// Database row for the copy_allocations table.
#[derive(Debug, Clone, FromRow)]
struct AllocationRow {
    id: Uuid,
    user_id: Uuid,
    strategy_id: Uuid,
    allocated_amount: Decimal,
    total_earned: Decimal,
    status: String,
    last_profit_at: Option<DateTime<Utc>>,
    last_distributed_period: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<AllocationRow> for CopyAllocation {
    type Error = anyhow::Error;

    fn try_from(row: AllocationRow) -> anyhow::Result<Self> {
        Ok(CopyAllocation {
            id: row.id,
            user_id: row.user_id,
            strategy_id: row.strategy_id,
            allocated_amount: row.allocated_amount,
            total_earned: row.total_earned,
            status: row.status.parse::<AllocationStatus>()?,
            last_profit_at: row.last_profit_at,
            last_distributed_period: row.last_distributed_period,
            created_at: row.created_at,
            version: row.version,
        })
    }
}

const COLUMNS: &str = "id, user_id, strategy_id, allocated_amount, total_earned, status, \
                       last_profit_at, last_distributed_period, created_at, version";

pub async fn insert_allocation(
    conn: &mut PgConnection,
    a: &CopyAllocation,
) -> anyhow::Result<CopyAllocation> {
    let row = sqlx::query_as::<_, AllocationRow>(&format!(
        r#"
        INSERT INTO copy_allocations
            (id, user_id, strategy_id, allocated_amount, total_earned, status,
             last_profit_at, last_distributed_period, created_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(a.id)
    .bind(a.user_id)
    .bind(a.strategy_id)
    .bind(a.allocated_amount)
    .bind(a.total_earned)
    .bind(a.status.as_str())
    .bind(a.last_profit_at)
    .bind(a.last_distributed_period)
    .bind(a.created_at)
    .bind(a.version)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// Versioned update; `None` means the row moved on since it was read.
pub async fn update_allocation_versioned(
    conn: &mut PgConnection,
    a: &CopyAllocation,
    expected_version: i64,
) -> anyhow::Result<Option<CopyAllocation>> {
    let row = sqlx::query_as::<_, AllocationRow>(&format!(
        r#"
        UPDATE copy_allocations
        SET total_earned = $3,
            status = $4,
            last_profit_at = $5,
            last_distributed_period = $6,
            version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(a.id)
    .bind(expected_version)
    .bind(a.total_earned)
    .bind(a.status.as_str())
    .bind(a.last_profit_at)
    .bind(a.last_distributed_period)
    .fetch_optional(conn)
    .await?;

    row.map(CopyAllocation::try_from).transpose()
}

pub async fn get_allocation<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> anyhow::Result<Option<CopyAllocation>> {
    let row = sqlx::query_as::<_, AllocationRow>(&format!(
        "SELECT {COLUMNS} FROM copy_allocations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(CopyAllocation::try_from).transpose()
}

pub async fn get_allocations_for_user<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
) -> anyhow::Result<Vec<CopyAllocation>> {
    let rows = sqlx::query_as::<_, AllocationRow>(&format!(
        "SELECT {COLUMNS} FROM copy_allocations WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(CopyAllocation::try_from).collect()
}

pub async fn get_active_allocations_after<'e>(
    executor: impl PgExecutor<'e>,
    after: Option<Uuid>,
    limit: i64,
) -> anyhow::Result<Vec<CopyAllocation>> {
    let rows = sqlx::query_as::<_, AllocationRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM copy_allocations
        WHERE status = 'active' AND ($1::uuid IS NULL OR id > $1)
        ORDER BY id ASC
        LIMIT $2
        "#
    ))
    .bind(after)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(CopyAllocation::try_from).collect()
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct AllocationTotals {
    pub active: i64,
    pub allocated: Decimal,
    pub earned: Decimal,
}

pub async fn allocation_totals<'e>(executor: impl PgExecutor<'e>) -> anyhow::Result<AllocationTotals> {
    let totals = sqlx::query_as::<_, AllocationTotals>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'active') AS active,
            COALESCE(SUM(allocated_amount) FILTER (WHERE status = 'active'), 0) AS allocated,
            COALESCE(SUM(total_earned), 0) AS earned
        FROM copy_allocations
        "#,
    )
    .fetch_one(executor)
    .await?;

    Ok(totals)
}
