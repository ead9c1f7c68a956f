use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::Strategy;

pub async fn get_strategy<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> anyhow::Result<Option<Strategy>> {
    let strategy = sqlx::query_as::<_, Strategy>(
        "SELECT id, name, daily_rate, is_active, updated_at FROM strategies WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(strategy)
}

/// Create or replace a strategy definition.
pub async fn upsert_strategy<'e>(executor: impl PgExecutor<'e>, s: &Strategy) -> anyhow::Result<Strategy> {
    let strategy = sqlx::query_as::<_, Strategy>(
        r#"
        INSERT INTO strategies (id, name, daily_rate, is_active, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE
            SET name = $2, daily_rate = $3, is_active = $4, updated_at = $5
        RETURNING id, name, daily_rate, is_active, updated_at
        "#,
    )
    .bind(s.id)
    .bind(&s.name)
    .bind(s.daily_rate)
    .bind(s.is_active)
    .bind(s.updated_at)
    .fetch_one(executor)
    .await?;

    Ok(strategy)
}
