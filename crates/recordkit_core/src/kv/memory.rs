//! In-memory key-value backend.
//!
//! Clones share the same map, so a test can hand one handle to the store and
//! keep another to inspect bytes or inject write failures.

use super::{KeyValueStore, KvError, KvOp, KvResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Vec<u8>>,
    fail_writes: bool,
    commits: usize,
}

/// `BTreeMap`-backed store with shared-handle semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched back off.
    pub fn fail_writes(&self, enabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = enabled;
        }
    }

    /// Number of successful logical writes (`set`, `remove` or `commit`).
    pub fn commit_count(&self) -> usize {
        self.state.lock().map(|state| state.commits).unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn writable(&self) -> KvResult<MutexGuard<'_, MemoryState>> {
        let state = self.lock()?;
        if state.fail_writes {
            return Err(KvError::Unavailable("writes disabled".to_string()));
        }
        Ok(state)
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
        let mut state = self.writable()?;
        state.entries.insert(key.to_string(), value.to_vec());
        state.commits += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> KvResult<()> {
        let mut state = self.writable()?;
        state.entries.remove(key);
        state.commits += 1;
        Ok(())
    }

    fn commit(&self, batch: &[KvOp]) -> KvResult<()> {
        let mut state = self.writable()?;
        for op in batch {
            match op {
                KvOp::Set { key, value } => {
                    state.entries.insert(key.clone(), value.clone());
                }
                KvOp::Remove { key } => {
                    state.entries.remove(key);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }
}
