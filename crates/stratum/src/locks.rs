//! Per-name lock table.
//!
//! Slots are created on demand and dropped once no holder or waiter
//! references them. A [`LockSet`] acquires all of its names in sorted
//! order, so any two lock sets that overlap are acquired in the same
//! order and cannot deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

type Slot = Arc<Mutex<()>>;

/// Table of named mutexes.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Guards for a set of names, released on drop.
#[must_use = "locks are released as soon as the set is dropped"]
pub struct LockSet<'a> {
    table: &'a LockTable,
    names: Vec<String>,
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl LockTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every name in `names` is held by the caller.
    pub fn lock<'a, S: AsRef<str>>(&'a self, names: &[S]) -> LockSet<'a> {
        let mut names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        names.sort();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in &names {
            let slot = Arc::clone(self.slots.lock().entry(name.clone()).or_default());
            guards.push(slot.lock_arc());
        }

        LockSet {
            table: self,
            names,
            guards,
        }
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, names: &[String]) {
        let mut slots = self.slots.lock();
        for name in names {
            // Clones are only taken under the table lock, so a count of one
            // means nobody else holds or waits on this slot.
            if slots.get(name).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(name);
            }
        }
    }
}

impl LockSet<'_> {
    /// Names held by this set, sorted.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        self.table.release(&self.names);
    }
}
