use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::ledger::RetryPolicy;
use crate::lifecycle::PrincipalPolicy;
use crate::services::accrual_scheduler::SchedulerConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,

    // Bearer token for /api/*; auth disabled when unset
    pub api_token: Option<String>,

    // Accrual scheduler
    pub accrual_enabled: bool,
    pub accrual_interval_secs: u64,
    pub accrual_workers: usize,
    pub accrual_page_size: i64,
    pub principal_policy: PrincipalPolicy,

    // Ledger commits
    pub ledger_max_retries: u32,
    pub ledger_retry_backoff_ms: u64,
    pub ledger_timeout_ms: u64,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let principal_policy = match env::var("PRINCIPAL_POLICY") {
            Ok(raw) => raw.parse()?,
            Err(_) => PrincipalPolicy::default(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 10),

            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),

            accrual_enabled: parsed("ACCRUAL_ENABLED", true),
            accrual_interval_secs: parsed("ACCRUAL_INTERVAL_SECS", 86_400),
            accrual_workers: parsed("ACCRUAL_WORKERS", 8),
            accrual_page_size: parsed("ACCRUAL_PAGE_SIZE", 500),
            principal_policy,

            ledger_max_retries: parsed("LEDGER_MAX_RETRIES", 3),
            ledger_retry_backoff_ms: parsed("LEDGER_RETRY_BACKOFF_MS", 25),
            ledger_timeout_ms: parsed("LEDGER_TIMEOUT_MS", 5_000),
        })
    }
}

/// Everything the engine needs, independent of where it came from.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub principal_policy: PrincipalPolicy,
    pub scheduler: SchedulerConfig,
}

impl From<&AppConfig> for EngineConfig {
    fn from(c: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: c.ledger_max_retries.max(1),
                backoff: Duration::from_millis(c.ledger_retry_backoff_ms),
                timeout: Duration::from_millis(c.ledger_timeout_ms),
            },
            principal_policy: c.principal_policy,
            scheduler: SchedulerConfig {
                workers: c.accrual_workers.max(1),
                page_size: c.accrual_page_size.max(1),
            },
        }
    }
}
