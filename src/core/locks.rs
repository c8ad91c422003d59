//! Per-entity lock table.
//!
//! Operations lock every key they may touch (`<kind>/<name>`) before calling the engine.
//! Keys are taken one at a time in sorted order, so two operations with overlapping key
//! sets can never wait on each other in a cycle. The returned guard releases everything
//! when dropped, on success and error paths alike.

use crate::core::error::{HiveError, PersistenceError};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex};
use tracing::trace;

#[derive(Default)]
pub struct NameLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every key in `keys` is held by the caller.
    pub fn acquire<I>(&self, keys: I) -> Result<NameGuard<'_>, HiveError>
    where
        I: IntoIterator<Item = String>,
    {
        let ordered: BTreeSet<String> = keys.into_iter().collect();
        let mut guard = NameGuard {
            locks: self,
            keys: Vec::with_capacity(ordered.len()),
        };
        for key in ordered {
            let mut held = self.held_set()?;
            while held.contains(&key) {
                held = self
                    .released
                    .wait(held)
                    .map_err(|_| PersistenceError::Poisoned("lock table"))?;
            }
            held.insert(key.clone());
            trace!(key = %key, "lock acquired");
            guard.keys.push(key);
        }
        Ok(guard)
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }

    fn held_set(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>, HiveError> {
        self.held
            .lock()
            .map_err(|_| PersistenceError::Poisoned("lock table").into())
    }

    fn release(&self, keys: &[String]) {
        let mut held = match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            held.remove(key);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Keys held by one operation.
pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    keys: Vec<String>,
}

impl NameGuard<'_> {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn covers<'k>(&self, keys: impl IntoIterator<Item = &'k String>) -> bool {
        keys.into_iter().all(|k| self.keys.contains(k))
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.keys);
    }
}
