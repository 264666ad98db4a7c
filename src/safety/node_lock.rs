//! Advisory per-node single-writer lock shared by destructive controllers.
//!
//! The lock keeps an evictor and a rebalancer from acting on the same node in
//! the same tick. It is advisory: correct use is required of callers.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("node {node} is locked by controller {holder} since {since}")]
    Held {
        node: String,
        holder: String,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
struct LockEntry {
    controller: String,
    acquired_at: DateTime<Utc>,
    refreshed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct NodeLockManager {
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl NodeLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the node lock for `controller`. Re-acquiring a lock already
    /// held by the same controller is a no-op success.
    pub fn try_lock(&self, node: &str, controller: &str) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        match locks.get(node) {
            Some(entry) if entry.controller != controller => Err(LockError::Held {
                node: node.to_string(),
                holder: entry.controller.clone(),
                since: entry.acquired_at,
            }),
            Some(_) => Ok(()),
            None => {
                let now = Utc::now();
                locks.insert(
                    node.to_string(),
                    LockEntry {
                        controller: controller.to_string(),
                        acquired_at: now,
                        refreshed_at: now,
                    },
                );
                Ok(())
            }
        }
    }

    /// Release only when `controller` is the holder; silent no-op otherwise.
    pub fn unlock(&self, node: &str, controller: &str) {
        let mut locks = self.locks.lock();
        if locks.get(node).map(|e| e.controller.as_str()) == Some(controller) {
            locks.remove(node);
        }
    }

    /// Heartbeat: update the holder's timestamp. Returns false when the
    /// caller does not hold the lock.
    pub fn refresh(&self, node: &str, controller: &str) -> bool {
        let mut locks = self.locks.lock();
        match locks.get_mut(node) {
            Some(entry) if entry.controller == controller => {
                entry.refreshed_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Drop locks whose last heartbeat is older than `max_age`. Returns the
    /// number of locks removed.
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        let horizon = Utc::now() - max_age;
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, entry| entry.refreshed_at >= horizon);
        before - locks.len()
    }

    pub fn holder(&self, node: &str) -> Option<(String, DateTime<Utc>)> {
        let locks = self.locks.lock();
        locks
            .get(node)
            .map(|e| (e.controller.clone(), e.acquired_at))
    }

    pub fn held_count(&self) -> usize {
        self.locks.lock().len()
    }
}
