use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use accrual_engine::api::router::create_router;
use accrual_engine::config::{AppConfig, EngineConfig};
use accrual_engine::db::{self, PgStore};
use accrual_engine::engine::Engine;
use accrual_engine::services::accrual_scheduler::{run_accrual_scheduler, AccrualScheduler};
use accrual_engine::{metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database connected, migrations applied");

    let engine = Engine::new(PgStore::new(pool), &EngineConfig::from(&config));

    // One-shot mode for cron: `accrual_engine accrue`
    if std::env::args().nth(1).as_deref() == Some("accrue") {
        let report = engine.scheduler.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let metrics_handle = metrics::init_metrics()?;
    let pause_flag = Arc::new(AtomicBool::new(false));

    if config.accrual_enabled {
        let scheduler = engine.scheduler.clone();
        let interval_secs = config.accrual_interval_secs;
        let flag = pause_flag.clone();
        tokio::spawn(async move {
            run_accrual_scheduler(scheduler, interval_secs, flag).await;
        });
        tracing::info!(
            interval_secs = config.accrual_interval_secs,
            workers = config.accrual_workers,
            principal_policy = %config.principal_policy,
            "Accrual scheduler spawned"
        );
    } else {
        tracing::info!("Accrual scheduler disabled (ACCRUAL_ENABLED=false)");
    }

    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set; /api routes are unauthenticated");
    }

    let scheduler = engine.scheduler.clone();
    let state = AppState {
        engine,
        metrics_handle,
        pause_flag,
        api_token: config.api_token.clone(),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(scheduler: AccrualScheduler<PgStore>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, interrupting accrual");
    scheduler.interrupt();
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
