use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per key, created on demand and dropped when idle.
///
/// Used so that accrual, cancellation and reactivation of the same
/// position or allocation never run concurrently inside one process.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

pub struct KeyedGuard {
    key: Uuid,
    slots: Arc<StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: Uuid) -> KeyedGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            key,
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of keys currently holding a slot.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map still references the slot: nobody is waiting on it.
        if slots.get(&self.key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(&self.key);
        }
    }
}
