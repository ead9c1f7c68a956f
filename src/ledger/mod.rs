pub mod audit;
pub mod retry;
pub mod writer;

pub use audit::{verify_user_ledger, LedgerAudit};
pub use retry::{with_conflict_retry, RetryPolicy};
pub use writer::{ledger_entry, LedgerWriter};
