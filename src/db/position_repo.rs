use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{DistributionEvent, PlanSnapshot, Position, PositionStatus};

/// Database row for the positions table.
#[derive(Debug, Clone, FromRow)]
struct PositionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Option<Uuid>,
    plan_name: String,
    plan_return_pct: Decimal,
    plan_duration_days: i64,
    plan_min_amount: Decimal,
    plan_max_amount: Option<Decimal>,
    principal: Decimal,
    daily_rate: Decimal,
    expected_return: Decimal,
    accumulated_profit: Decimal,
    status: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    last_distributed_period: Option<NaiveDate>,
    distribution_history: Json<Vec<DistributionEvent>>,
    version: i64,
}

impl TryFrom<PositionRow> for Position {
    type Error = anyhow::Error;

    fn try_from(row: PositionRow) -> anyhow::Result<Self> {
        Ok(Position {
            id: row.id,
            user_id: row.user_id,
            plan: PlanSnapshot {
                plan_id: row.plan_id,
                name: row.plan_name,
                return_pct: row.plan_return_pct,
                duration_days: row.plan_duration_days,
                min_amount: row.plan_min_amount,
                max_amount: row.plan_max_amount,
            },
            principal: row.principal,
            daily_rate: row.daily_rate,
            expected_return: row.expected_return,
            accumulated_profit: row.accumulated_profit,
            status: row.status.parse::<PositionStatus>()?,
            start_date: row.start_date,
            end_date: row.end_date,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            last_distributed_period: row.last_distributed_period,
            distribution_history: row.distribution_history.0,
            version: row.version,
        })
    }
}

const COLUMNS: &str = "id, user_id, plan_id, plan_name, plan_return_pct, plan_duration_days, \
                       plan_min_amount, plan_max_amount, principal, daily_rate, expected_return, \
                       accumulated_profit, status, start_date, end_date, completed_at, cancelled_at, \
                       last_distributed_period, distribution_history, version";

pub async fn insert_position(conn: &mut PgConnection, p: &Position) -> anyhow::Result<Position> {
    let row = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        INSERT INTO positions
            (id, user_id, plan_id, plan_name, plan_return_pct, plan_duration_days,
             plan_min_amount, plan_max_amount, principal, daily_rate, expected_return,
             accumulated_profit, status, start_date, end_date, completed_at, cancelled_at,
             last_distributed_period, distribution_history, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(p.id)
    .bind(p.user_id)
    .bind(p.plan.plan_id)
    .bind(&p.plan.name)
    .bind(p.plan.return_pct)
    .bind(p.plan.duration_days)
    .bind(p.plan.min_amount)
    .bind(p.plan.max_amount)
    .bind(p.principal)
    .bind(p.daily_rate)
    .bind(p.expected_return)
    .bind(p.accumulated_profit)
    .bind(p.status.as_str())
    .bind(p.start_date)
    .bind(p.end_date)
    .bind(p.completed_at)
    .bind(p.cancelled_at)
    .bind(p.last_distributed_period)
    .bind(Json(&p.distribution_history))
    .bind(p.version)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// Write the mutable part of a position if it is still at `expected_version`.
/// Returns `None` when another writer got there first.
pub async fn update_position_versioned(
    conn: &mut PgConnection,
    p: &Position,
    expected_version: i64,
) -> anyhow::Result<Option<Position>> {
    let row = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        UPDATE positions
        SET accumulated_profit = $3,
            status = $4,
            completed_at = $5,
            cancelled_at = $6,
            last_distributed_period = $7,
            distribution_history = $8,
            version = version + 1
        WHERE id = $1 AND version = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(p.id)
    .bind(expected_version)
    .bind(p.accumulated_profit)
    .bind(p.status.as_str())
    .bind(p.completed_at)
    .bind(p.cancelled_at)
    .bind(p.last_distributed_period)
    .bind(Json(&p.distribution_history))
    .fetch_optional(conn)
    .await?;

    row.map(Position::try_from).transpose()
}

pub async fn get_position<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> anyhow::Result<Option<Position>> {
    let row = sqlx::query_as::<_, PositionRow>(&format!(
        "SELECT {COLUMNS} FROM positions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(Position::try_from).transpose()
}

pub async fn get_positions_for_user<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
) -> anyhow::Result<Vec<Position>> {
    let rows = sqlx::query_as::<_, PositionRow>(&format!(
        "SELECT {COLUMNS} FROM positions WHERE user_id = $1 ORDER BY start_date DESC"
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Position::try_from).collect()
}

/// Keyset page over active positions.
pub async fn get_active_positions_after<'e>(
    executor: impl PgExecutor<'e>,
    after: Option<Uuid>,
    limit: i64,
) -> anyhow::Result<Vec<Position>> {
    let rows = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM positions
        WHERE status = 'active' AND ($1::uuid IS NULL OR id > $1)
        ORDER BY id ASC
        LIMIT $2
        "#
    ))
    .bind(after)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Position::try_from).collect()
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct PositionTotals {
    pub active: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub active_principal: Decimal,
    pub profit_paid: Decimal,
}

pub async fn position_totals<'e>(executor: impl PgExecutor<'e>) -> anyhow::Result<PositionTotals> {
    let totals = sqlx::query_as::<_, PositionTotals>(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'active') AS active,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
            COALESCE(SUM(principal) FILTER (WHERE status = 'active'), 0) AS active_principal,
            COALESCE(SUM(accumulated_profit), 0) AS profit_paid
        FROM positions
        "#,
    )
    .fetch_one(executor)
    .await?;

    Ok(totals)
}
