use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::db::LedgerStore;
use crate::errors::LedgerError;
use crate::lifecycle::{AccrualOutcome, AllocationManager, AllocationOutcome, PositionManager};
use crate::models::{period_of, CopyAllocation, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Items accrued concurrently.
    pub workers: usize,
    /// Rows per cursor page.
    pub page_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Position,
    Allocation,
}

impl ItemKind {
    fn as_str(self) -> &'static str {
        match self {
            ItemKind::Position => "position",
            ItemKind::Allocation => "allocation",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemCounts {
    pub succeeded: u64,
    /// Already processed for the period, or no longer active.
    pub skipped: u64,
    pub failed: u64,
    /// Positions completed or allocations deactivated this cycle.
    pub closed: u64,
}

/// Enough context to replay one item by hand.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub kind: ItemKind,
    pub id: Uuid,
    pub user_id: Uuid,
    pub period: NaiveDate,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub period: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub positions: ItemCounts,
    pub allocations: ItemCounts,
    pub total_credited: Decimal,
    pub failures: Vec<ItemFailure>,
    /// Pages that could not be loaded; the rest of that kind was not visited.
    pub load_errors: u64,
    pub interrupted: bool,
}

impl SummaryReport {
    fn new(period: NaiveDate, started_at: DateTime<Utc>) -> Self {
        Self {
            period,
            started_at,
            finished_at: started_at,
            positions: ItemCounts::default(),
            allocations: ItemCounts::default(),
            total_credited: Decimal::ZERO,
            failures: Vec::new(),
            load_errors: 0,
            interrupted: false,
        }
    }

    pub fn processed(&self) -> u64 {
        [&self.positions, &self.allocations]
            .iter()
            .map(|c| c.succeeded + c.skipped + c.failed)
            .sum()
    }

    fn record(&mut self, kind: ItemKind, result: ItemResult) {
        let counts = match kind {
            ItemKind::Position => &mut self.positions,
            ItemKind::Allocation => &mut self.allocations,
        };
        match result {
            ItemResult::Applied { credited, closed } => {
                counts.succeeded += 1;
                if closed {
                    counts.closed += 1;
                }
                self.total_credited += credited;
                counter!("accrual_items_succeeded_total", "kind" => kind.as_str()).increment(1);
            }
            ItemResult::Skipped => {
                counts.skipped += 1;
                counter!("accrual_items_skipped_total", "kind" => kind.as_str()).increment(1);
            }
            ItemResult::Interrupted => {
                self.interrupted = true;
            }
            ItemResult::Failed { id, user_id, error } => {
                counts.failed += 1;
                counter!("accrual_items_failed_total", "kind" => kind.as_str()).increment(1);
                tracing::error!(
                    kind = kind.as_str(),
                    id = %id,
                    user_id = %user_id,
                    period = %self.period,
                    error = %error,
                    "Accrual item failed"
                );
                self.failures.push(ItemFailure {
                    kind,
                    id,
                    user_id,
                    period: self.period,
                    error: error.to_string(),
                });
            }
        }
    }
}

enum ItemResult {
    Applied { credited: Decimal, closed: bool },
    Skipped,
    Interrupted,
    Failed { id: Uuid, user_id: Uuid, error: LedgerError },
}

/// Walks every active position and allocation once per period.
///
/// Items are isolated: one failing never stops the others. Re-running within
/// the same period credits nothing, because each item carries its own
/// `last_distributed_period`.
#[derive(Clone)]
pub struct AccrualScheduler<S> {
    store: S,
    positions: PositionManager<S>,
    allocations: AllocationManager<S>,
    config: SchedulerConfig,
    interrupt: Arc<AtomicBool>,
    cycle_lock: Arc<Mutex<()>>,
}

impl<S: LedgerStore> AccrualScheduler<S> {
    pub fn new(
        store: S,
        positions: PositionManager<S>,
        allocations: AllocationManager<S>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            positions,
            allocations,
            config,
            interrupt: Arc::new(AtomicBool::new(false)),
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ask a running cycle to stop between items. Sticky: later cycles stop
    /// immediately too.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub async fn run_cycle(&self) -> SummaryReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`. Cycles never overlap within a process.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> SummaryReport {
        let _cycle = self.cycle_lock.lock().await;
        let timer = Instant::now();
        let period = period_of(now);
        let mut report = SummaryReport::new(period, Utc::now());

        tracing::info!(period = %period, "Accrual cycle started");

        self.run_positions(period, now, &mut report).await;
        self.run_allocations(period, now, &mut report).await;

        report.finished_at = Utc::now();
        histogram!("accrual_cycle_seconds").record(timer.elapsed().as_secs_f64());
        gauge!("accrual_last_run_timestamp_seconds").set(report.finished_at.timestamp() as f64);

        tracing::info!(
            period = %period,
            positions_succeeded = report.positions.succeeded,
            positions_skipped = report.positions.skipped,
            positions_failed = report.positions.failed,
            positions_completed = report.positions.closed,
            allocations_succeeded = report.allocations.succeeded,
            allocations_skipped = report.allocations.skipped,
            allocations_failed = report.allocations.failed,
            allocations_deactivated = report.allocations.closed,
            total_credited = %report.total_credited,
            load_errors = report.load_errors,
            interrupted = report.interrupted,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Accrual cycle finished"
        );
        report
    }

    async fn run_positions(&self, period: NaiveDate, now: DateTime<Utc>, report: &mut SummaryReport) {
        let mut cursor = None;
        loop {
            if self.is_interrupted() {
                report.interrupted = true;
                return;
            }
            let page = match self.store.active_positions_page(cursor, self.config.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    report.load_errors += 1;
                    tracing::error!(error = %e, after = ?cursor, "Failed to load active positions page");
                    return;
                }
            };
            let Some(last) = page.last() else { return };
            cursor = Some(last.id);
            let full = page.len() as i64 >= self.config.page_size;

            let results: Vec<ItemResult> = stream::iter(page)
                .map(|p| self.accrue_position(p, period, now))
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;
            for result in results {
                report.record(ItemKind::Position, result);
            }

            if !full {
                return;
            }
        }
    }

    async fn run_allocations(&self, period: NaiveDate, now: DateTime<Utc>, report: &mut SummaryReport) {
        let mut cursor = None;
        loop {
            if self.is_interrupted() {
                report.interrupted = true;
                return;
            }
            let page = match self.store.active_allocations_page(cursor, self.config.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    report.load_errors += 1;
                    tracing::error!(error = %e, after = ?cursor, "Failed to load active allocations page");
                    return;
                }
            };
            let Some(last) = page.last() else { return };
            cursor = Some(last.id);
            let full = page.len() as i64 >= self.config.page_size;

            let results: Vec<ItemResult> = stream::iter(page)
                .map(|a| self.accrue_allocation(a, period, now))
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;
            for result in results {
                report.record(ItemKind::Allocation, result);
            }

            if !full {
                return;
            }
        }
    }

    async fn accrue_position(&self, position: Position, period: NaiveDate, now: DateTime<Utc>) -> ItemResult {
        if self.is_interrupted() {
            return ItemResult::Interrupted;
        }
        match self.positions.accrue(position.id, period, now).await {
            Ok(AccrualOutcome::Applied(acc)) => ItemResult::Applied {
                credited: acc.credited,
                closed: acc.completed,
            },
            Ok(AccrualOutcome::NotActive(_)) => ItemResult::Skipped,
            Err(LedgerError::AlreadyProcessedForPeriod { .. }) => ItemResult::Skipped,
            Err(error) => ItemResult::Failed {
                id: position.id,
                user_id: position.user_id,
                error,
            },
        }
    }

    async fn accrue_allocation(
        &self,
        allocation: CopyAllocation,
        period: NaiveDate,
        now: DateTime<Utc>,
    ) -> ItemResult {
        if self.is_interrupted() {
            return ItemResult::Interrupted;
        }
        match self.allocations.accrue(allocation.id, period, now).await {
            Ok(AllocationOutcome::Credited { amount, .. }) => ItemResult::Applied {
                credited: amount,
                closed: false,
            },
            Ok(AllocationOutcome::NoProfit(_)) => ItemResult::Applied {
                credited: Decimal::ZERO,
                closed: false,
            },
            Ok(AllocationOutcome::Deactivated { .. }) => ItemResult::Applied {
                credited: Decimal::ZERO,
                closed: true,
            },
            Ok(AllocationOutcome::NotActive(_)) => ItemResult::Skipped,
            Err(LedgerError::AlreadyProcessedForPeriod { .. }) => ItemResult::Skipped,
            Err(error) => ItemResult::Failed {
                id: allocation.id,
                user_id: allocation.user_id,
                error,
            },
        }
    }
}

/// Run the accrual loop. Ticks every `interval_secs`, skipping ticks while
/// paused, and stops once the scheduler is interrupted.
pub async fn run_accrual_scheduler<S: LedgerStore>(
    scheduler: AccrualScheduler<S>,
    interval_secs: u64,
    pause_flag: Arc<AtomicBool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        ticker.tick().await;

        if scheduler.is_interrupted() {
            tracing::info!("Accrual scheduler stopped");
            return;
        }

        // Respect pause flag
        if pause_flag.load(Ordering::Relaxed) {
            tracing::debug!("Accrual scheduler paused");
            continue;
        }

        let report = scheduler.run_cycle().await;
        if !report.failures.is_empty() || report.load_errors > 0 {
            tracing::warn!(
                failures = report.failures.len(),
                load_errors = report.load_errors,
                "Accrual cycle finished with failures"
            );
        }
    }
}
