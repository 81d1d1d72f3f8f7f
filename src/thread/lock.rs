use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A FIFO async mutex per thread id, refcounted and garbage-collected when
/// its waiter count drops to zero — the only concurrency primitive the
/// core relies on for thread-mutating operations, per the re-architecture
/// hint to replace any ad-hoc "is this thread running" boolean.
#[derive(Default)]
pub struct ThreadLocks {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub type ThreadLockGuard = OwnedMutexGuard<()>;

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `thread_id`. Held for the guard's lifetime;
    /// dropping it releases the lock and, if no other waiter referenced
    /// the entry in the meantime, the entry is swept on the next acquire.
    pub async fn acquire(&self, thread_id: &str) -> ThreadLockGuard {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        self.sweep().await;
        entry.lock_owned().await
    }

    async fn sweep(&self) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
