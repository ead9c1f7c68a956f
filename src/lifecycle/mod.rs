pub mod allocations;
pub mod locks;
pub mod positions;

pub use allocations::{AllocationManager, AllocationOutcome};
pub use locks::KeyedLocks;
pub use positions::{AccrualOutcome, Cancellation, PositionAccrual, PositionManager, PrincipalPolicy};
