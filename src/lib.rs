pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod query;
pub mod services;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState<S> {
    pub engine: Engine<S>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    /// Pauses the periodic accrual loop; manual runs still go through.
    pub pause_flag: Arc<AtomicBool>,
    pub api_token: Option<String>,
}
