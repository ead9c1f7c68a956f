use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::User;

/// Insert a user with a zero balance. Funds arrive through the ledger only.
pub async fn insert_user<'e>(
    executor: impl PgExecutor<'e>,
    email: Option<&str>,
) -> anyhow::Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, balance)
        VALUES ($1, $2, 0)
        RETURNING id, email, balance, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .fetch_one(executor)
    .await?;

    Ok(user)
}

pub async fn get_user<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, balance, created_at, updated_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(user)
}

/// Lock balance rows for the duration of the surrounding transaction.
/// `ids` must be sorted so concurrent commits acquire locks in one order.
pub async fn lock_balances(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<Vec<(Uuid, Decimal)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, Decimal)>(
        "SELECT id, balance FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(ids)
    .fetch_all(conn)
    .await
}

pub async fn set_balance(
    conn: &mut PgConnection,
    id: Uuid,
    balance: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET balance = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(balance)
        .bind(Utc::now())
        .execute(conn)
        .await?;

    Ok(())
}

/// User count and the sum of cached balances.
pub async fn balance_totals<'e>(executor: impl PgExecutor<'e>) -> anyhow::Result<(i64, Decimal)> {
    let row: (i64, Option<Decimal>) =
        sqlx::query_as("SELECT COUNT(*), SUM(balance) FROM users")
            .fetch_one(executor)
            .await?;

    Ok((row.0, row.1.unwrap_or(Decimal::ZERO)))
}
