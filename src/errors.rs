use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Errors raised by the ledger, the position lifecycle and the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("position not found: {0}")]
    PositionNotFound(Uuid),

    #[error("copy-trading allocation not found: {0}")]
    AllocationNotFound(Uuid),

    #[error("{id} already processed for period {period}")]
    AlreadyProcessedForPeriod { id: Uuid, period: NaiveDate },

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("concurrent modification retry limit exceeded after {attempts} attempts")]
    ConcurrentModificationRetryExceeded { attempts: u32 },

    #[error("strategy unavailable: {0}")]
    StrategyUnavailable(Uuid),

    #[error("illegal {entity} transition: {from} -> {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("ledger operation timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    /// Only conflicts are retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // serialization_failure / deadlock_detected
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return LedgerError::ConcurrencyConflict(db.message().to_string());
            }
        }
        LedgerError::Store(e.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".into()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance { .. } => AppError::Unprocessable(e.to_string()),
            LedgerError::InvalidAmount(_) => AppError::BadRequest(e.to_string()),
            LedgerError::UserNotFound(_)
            | LedgerError::PositionNotFound(_)
            | LedgerError::AllocationNotFound(_) => AppError::NotFound(e.to_string()),
            LedgerError::AlreadyProcessedForPeriod { .. }
            | LedgerError::ConcurrencyConflict(_)
            | LedgerError::ConcurrentModificationRetryExceeded { .. }
            | LedgerError::IllegalTransition { .. } => AppError::Conflict(e.to_string()),
            LedgerError::StrategyUnavailable(_) => AppError::Unprocessable(e.to_string()),
            LedgerError::Timeout(_) => AppError::Internal(anyhow::anyhow!(e.to_string())),
            LedgerError::Store(inner) => AppError::Internal(inner),
        }
    }
}
