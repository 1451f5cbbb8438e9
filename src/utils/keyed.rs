//! Keyed map with one lock per entry.
//!
//! The outer `RwLock` only guards the key set; it is held briefly to look up or
//! insert an entry. Each entry's state sits behind its own `Mutex`, so updates
//! for unrelated keys never serialize on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub struct KeyedState<T> {
    entries: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> KeyedState<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the entry for `key`, creating it with `init` on first access.
    pub fn entry_or_insert_with(&self, key: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        if let Some(existing) = read_map(&self.entries).get(key) {
            return Arc::clone(existing);
        }
        let mut map = write_map(&self.entries);
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    /// Returns the entry for `key` without creating it.
    pub fn get(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        read_map(&self.entries).get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        write_map(&self.entries).remove(key)
    }

    pub fn clear(&self) {
        write_map(&self.entries).clear();
    }

    pub fn keys(&self) -> Vec<String> {
        read_map(&self.entries).keys().cloned().collect()
    }

    /// Snapshot of every entry, cloned under its own lock.
    pub fn snapshot_all(&self) -> HashMap<String, T>
    where
        T: Clone,
    {
        let entries: Vec<(String, Arc<Mutex<T>>)> = read_map(&self.entries)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        entries
            .into_iter()
            .map(|(k, v)| (k, lock(&v).clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        read_map(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for KeyedState<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks an entry, recovering the state if a previous holder panicked.
///
/// Entries hold plain counters and timestamps; a panic mid-update cannot leave
/// them in a state worse than a lost sample.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_map<T>(
    m: &RwLock<HashMap<String, Arc<Mutex<T>>>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mutex<T>>>> {
    m.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_map<T>(
    m: &RwLock<HashMap<String, Arc<Mutex<T>>>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Mutex<T>>>> {
    m.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
