use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{Transaction, TransactionStatus};

use super::LedgerEntry;

/// Database row for the transactions table.
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: Uuid,
    seq: i64,
    user_id: Uuid,
    kind: String,
    amount: Decimal,
    status: String,
    description: String,
    balance_before: Decimal,
    balance_after: Decimal,
    linked_position_id: Option<Uuid>,
    linked_allocation_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = anyhow::Error;

    fn try_from(row: TransactionRow) -> anyhow::Result<Self> {
        Ok(Transaction {
            id: row.id,
            seq: row.seq,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            amount: row.amount,
            status: row.status.parse()?,
            description: row.description,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            linked_position_id: row.linked_position_id,
            linked_allocation_id: row.linked_allocation_id,
            created_at: row.created_at,
        })
    }
}

const COLUMNS: &str = "id, seq, user_id, kind, amount, status, description, balance_before, \
                       balance_after, linked_position_id, linked_allocation_id, created_at";

/// Append one ledger row. Only called from inside a commit.
pub async fn insert_transaction(
    conn: &mut PgConnection,
    entry: &LedgerEntry,
    balance_before: Decimal,
    balance_after: Decimal,
) -> anyhow::Result<Transaction> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        r#"
        INSERT INTO transactions
            (id, user_id, kind, amount, status, description,
             balance_before, balance_after, linked_position_id, linked_allocation_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(entry.user_id)
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(TransactionStatus::Completed.as_str())
    .bind(&entry.description)
    .bind(balance_before)
    .bind(balance_after)
    .bind(entry.linked_position_id)
    .bind(entry.linked_allocation_id)
    .fetch_one(conn)
    .await?;

    row.try_into()
}

/// All transactions of a user in ledger order.
pub async fn get_transactions_for_user<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
) -> anyhow::Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY seq ASC"
    ))
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(Transaction::try_from).collect()
}

pub async fn count_transactions<'e>(executor: impl PgExecutor<'e>) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(executor)
        .await?;

    Ok(row.0)
}
