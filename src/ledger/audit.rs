use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::LedgerStore;
use crate::errors::LedgerError;
use crate::models::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerBreak {
    pub seq: i64,
    pub transaction_id: Uuid,
    pub reason: String,
}

/// Result of replaying a user's ledger against the cached balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAudit {
    pub user_id: Uuid,
    pub transaction_count: usize,
    pub replayed_balance: Decimal,
    pub cached_balance: Decimal,
    pub breaks: Vec<LedgerBreak>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.breaks.is_empty() && self.replayed_balance == self.cached_balance
    }
}

/// Walk transactions in ledger order from a zero opening balance, recording
/// every row whose `balance_before` does not continue the chain or whose
/// `balance_after` is not `balance_before + amount`.
pub fn replay(transactions: &[Transaction]) -> (Decimal, Vec<LedgerBreak>) {
    let mut running = Decimal::ZERO;
    let mut breaks = Vec::new();

    for tx in transactions {
        if tx.balance_before != running {
            breaks.push(LedgerBreak {
                seq: tx.seq,
                transaction_id: tx.id,
                reason: format!("balance_before {} does not follow {}", tx.balance_before, running),
            });
        }
        if tx.balance_after != tx.balance_before + tx.amount {
            breaks.push(LedgerBreak {
                seq: tx.seq,
                transaction_id: tx.id,
                reason: format!(
                    "balance_after {} != {} + {}",
                    tx.balance_after, tx.balance_before, tx.amount
                ),
            });
        }
        running += tx.amount;
    }

    (running, breaks)
}

pub async fn verify_user_ledger<S: LedgerStore>(
    store: &S,
    user_id: Uuid,
) -> Result<LedgerAudit, LedgerError> {
    let user = store
        .get_user(user_id)
        .await?
        .ok_or(LedgerError::UserNotFound(user_id))?;
    let transactions = store.transactions_for_user(user_id).await?;
    let (replayed_balance, breaks) = replay(&transactions);

    let audit = LedgerAudit {
        user_id,
        transaction_count: transactions.len(),
        replayed_balance,
        cached_balance: user.balance,
        breaks,
    };

    if !audit.is_consistent() {
        tracing::error!(
            user_id = %user_id,
            replayed = %audit.replayed_balance,
            cached = %audit.cached_balance,
            breaks = audit.breaks.len(),
            "Ledger replay does not match cached balance"
        );
    }
    Ok(audit)
}
