use crate::config::EngineConfig;
use crate::db::LedgerStore;
use crate::ledger::LedgerWriter;
use crate::lifecycle::{AllocationManager, PositionManager};
use crate::services::accrual_scheduler::AccrualScheduler;

/// Wires the ledger, both lifecycle managers and the scheduler over one
/// store. The scheduler shares the managers' per-item locks, so a cycle and
/// a user action on the same position serialize.
#[derive(Clone)]
pub struct Engine<S> {
    pub ledger: LedgerWriter<S>,
    pub positions: PositionManager<S>,
    pub allocations: AllocationManager<S>,
    pub scheduler: AccrualScheduler<S>,
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S, config: &EngineConfig) -> Self {
        let ledger = LedgerWriter::new(store.clone(), config.retry);
        let positions = PositionManager::new(ledger.clone(), config.principal_policy);
        let allocations = AllocationManager::new(ledger.clone());
        let scheduler = AccrualScheduler::new(
            store,
            positions.clone(),
            allocations.clone(),
            config.scheduler,
        );
        Self {
            ledger,
            positions,
            allocations,
            scheduler,
        }
    }

    pub fn store(&self) -> &S {
        self.ledger.store()
    }
}
