//! Per-station serialization of priority transitions

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per station, created on first use
///
/// Holding the guard across the whole read-current / deactivate / insert
/// sequence means two transitions on one station can never observe the same
/// current source. Different stations never contend.
#[derive(Default)]
pub struct StationLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `station_id`
    pub async fn lock(&self, station_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(station_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of stations seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
