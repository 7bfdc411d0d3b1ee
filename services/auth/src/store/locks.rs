//! Per-aggregate locks
//!
//! Operations that validate and then commit against one role chain or
//! one user's sessions take the matching aggregate locks first. Keys are
//! always acquired in ascending order under a single deadline, so two
//! operations over overlapping aggregates can only wait on each other,
//! never deadlock; an expired deadline surfaces as `Busy`.

use common::{AggregateKey, CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Locks held until dropped
#[derive(Debug)]
pub struct AggregateGuard {
    keys: Vec<AggregateKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AggregateGuard {
    pub fn keys(&self) -> &[AggregateKey] {
        &self.keys
    }
}

/// Lock manager
#[derive(Debug)]
pub struct LockManager {
    slots: Mutex<HashMap<AggregateKey, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with a bounded acquire wait
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Acquire a single aggregate
    pub async fn acquire(&self, key: AggregateKey) -> CoreResult<AggregateGuard> {
        self.acquire_all(vec![key]).await
    }

    /// Acquire every key in ascending order before `timeout` elapses
    pub async fn acquire_all(&self, mut keys: Vec<AggregateKey>) -> CoreResult<AggregateGuard> {
        keys.sort();
        keys.dedup();

        let slots: Vec<(AggregateKey, Arc<AsyncMutex<()>>)> = {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only referenced by the map are idle
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            keys.iter()
                .map(|key| (*key, Arc::clone(map.entry(*key).or_default())))
                .collect()
        };

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(slots.len());

        for (key, slot) in slots {
            match tokio::time::timeout_at(deadline, slot.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    warn!("Timed out waiting for lock on {}", key);
                    return Err(CoreError::Busy { aggregate: key });
                }
            }
        }

        debug!("Acquired {} aggregate lock(s)", guards.len());
        Ok(AggregateGuard {
            keys,
            _guards: guards,
        })
    }
}
