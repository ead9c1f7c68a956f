use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which way a transaction kind is allowed to move the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
    /// Signed either way (admin adjustments).
    Either,
    /// Must carry a zero amount.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    InvestmentDebit,
    InvestmentReturn,
    CopyTradingReturn,
    PrincipalReturn,
    Adjustment,
    Notice,
}

impl TransactionKind {
    pub fn direction(self) -> Direction {
        match self {
            TransactionKind::Deposit
            | TransactionKind::InvestmentReturn
            | TransactionKind::CopyTradingReturn
            | TransactionKind::PrincipalReturn => Direction::Credit,
            TransactionKind::Withdrawal | TransactionKind::InvestmentDebit => Direction::Debit,
            TransactionKind::Adjustment => Direction::Either,
            TransactionKind::Notice => Direction::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::InvestmentDebit => "investment_debit",
            TransactionKind::InvestmentReturn => "investment_return",
            TransactionKind::CopyTradingReturn => "copy_trading_return",
            TransactionKind::PrincipalReturn => "principal_return",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Notice => "notice",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "investment_debit" => Ok(TransactionKind::InvestmentDebit),
            "investment_return" => Ok(TransactionKind::InvestmentReturn),
            "copy_trading_return" => Ok(TransactionKind::CopyTradingReturn),
            "principal_return" => Ok(TransactionKind::PrincipalReturn),
            "adjustment" => Ok(TransactionKind::Adjustment),
            "notice" => Ok(TransactionKind::Notice),
            other => Err(anyhow::anyhow!("unknown transaction kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            "pending" => Ok(TransactionStatus::Pending),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(anyhow::anyhow!("unknown transaction status: {other}")),
        }
    }
}

/// Immutable ledger record. `amount` is signed: debits are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// Global insertion order; per-user replay walks ascending `seq`.
    pub seq: i64,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub description: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub linked_position_id: Option<Uuid>,
    pub linked_allocation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
