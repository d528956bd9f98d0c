//! Per-key mutual exclusion, refcounted, with entries removed once no
//! caller is waiting on them.
//!
//! This replaces the source's `Lock(key)`/`Unlock(key)` pair — a call
//! convention that silently corrupts the waiter count if a caller forgets
//! the matching `Unlock` — with an RAII guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    waiters: usize,
}

/// A table of named mutexes, materialized on first use and torn down once
/// quiescent.
#[derive(Default)]
pub struct KeyedLockTable {
    table: Mutex<HashMap<String, Entry>>,
}

/// Holds exclusive access to one key. Releasing happens on drop.
pub struct KeyedLockGuard<'a> {
    table: &'a KeyedLockTable,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the caller exclusively holds `key`.
    pub async fn lock(&self, key: &str) -> KeyedLockGuard<'_> {
        let entry_mutex = {
            let mut table = self.table.lock().unwrap();
            let entry = table.entry(key.to_string()).or_insert_with(|| Entry {
                mutex: Arc::new(AsyncMutex::new(())),
                waiters: 0,
            });
            entry.waiters += 1;
            Arc::clone(&entry.mutex)
        };

        let guard = entry_mutex.lock_owned().await;
        KeyedLockGuard {
            table: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, key: &str) {
        let mut table = self.table.lock().unwrap();
        if let Some(entry) = table.get_mut(key) {
            entry.waiters -= 1;
            if entry.waiters == 0 {
                table.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        // Release the per-key mutex before touching the waiter count, so a
        // waiter woken by this drop never observes a stale count.
        self.guard.take();
        self.table.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn quiescent_after_balanced_lock_unlock() {
        let table = KeyedLockTable::new();
        {
            let _guard = table.lock("a").await;
            assert_eq!(table.len(), 1);
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let table = Arc::new(KeyedLockTable::new());
        let _a = table.lock("a").await;
        // Must not deadlock: different key, independent mutex.
        let _b = table.lock("b").await;
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn mutual_exclusion_and_quiescence() {
        let table = Arc::new(KeyedLockTable::new());
        let in_critical_section = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..20 {
            let table = Arc::clone(&table);
            let in_critical_section = Arc::clone(&in_critical_section);
            handles.push(tokio::spawn(async move {
                let _guard = table.lock("shared").await;
                let concurrent = in_critical_section.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0, "lock should be held exclusively");
                tokio::task::yield_now().await;
                in_critical_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(table.len(), 0);
    }
}
