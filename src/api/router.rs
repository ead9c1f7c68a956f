use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::LedgerStore;
use crate::AppState;
use super::auth::require_auth;
use super::handlers;

pub fn create_router<S: LedgerStore>(state: AppState<S>) -> Router {
    // Public routes, no authentication required
    let public = Router::new()
        .route("/health", get(handlers::health::health_check::<S>))
        .route("/metrics", get(handlers::metrics::render::<S>));

    // Protected API routes, require Bearer token when API_TOKEN is set
    let protected = Router::new()
        // Users and ledger
        .route("/api/users", post(handlers::users::create::<S>))
        .route("/api/users/:id/balance", get(handlers::users::balance::<S>))
        .route("/api/users/:id/deposits", post(handlers::users::deposit::<S>))
        .route("/api/users/:id/withdrawals", post(handlers::users::withdraw::<S>))
        .route("/api/users/:id/transactions", get(handlers::users::transactions::<S>))
        .route("/api/users/:id/ledger/verify", get(handlers::users::verify_ledger::<S>))
        .route("/api/users/:id/positions", get(handlers::users::positions::<S>))
        .route("/api/users/:id/allocations", get(handlers::users::allocations::<S>))
        // Positions
        .route("/api/positions", post(handlers::positions::create::<S>))
        .route("/api/positions/:id/cancel", post(handlers::positions::cancel::<S>))
        // Copy trading
        .route("/api/allocations", post(handlers::allocations::create::<S>))
        .route("/api/allocations/:id/stop", post(handlers::allocations::stop::<S>))
        .route("/api/allocations/:id/resume", post(handlers::allocations::resume::<S>))
        .route("/api/strategies/:id", put(handlers::strategies::upsert::<S>))
        // Admin
        .route("/api/stats", get(handlers::stats::platform::<S>))
        .route("/api/accrual/run", post(handlers::accrual::run::<S>))
        .route("/api/control/pause", post(handlers::control::pause::<S>))
        .route("/api/control/resume", post(handlers::control::resume::<S>))
        .layer(middleware::from_fn_with_state(state.api_token.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
