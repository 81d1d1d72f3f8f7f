pub mod event;
pub mod lock;

use crate::error::{CoreError, CoreResult};
use crate::time::Clock;
use chrono::{DateTime, Utc};
use event::Event;
use lock::{ThreadLockGuard, ThreadLocks};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{BufRead, BufReader, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub agent_id: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub task_id: Option<String>,
}

/// The append-only conversational substrate: one directory per thread, a
/// `manifest.yaml` and an append-only `log.jsonl`, grounded on the
/// teacher's `SessionStore` (one dir per session, `session.yaml` +
/// `messages.jsonl`). The per-thread FIFO lock is the only concurrency
/// primitive thread-mutating operations rely on.
pub struct ThreadStore {
    root: PathBuf,
    locks: ThreadLocks,
    clock: Arc<dyn Clock>,
}

impl ThreadStore {
    pub fn new(workspace_root: &std::path::Path, clock: Arc<dyn Clock>) -> Self {
        let root = crate::workspace::state_dir(workspace_root).join("threads");
        Self {
            root,
            locks: ThreadLocks::new(),
            clock,
        }
    }

    fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.root.join(thread_id)
    }

    fn manifest_path(&self, thread_id: &str) -> PathBuf {
        self.thread_dir(thread_id).join("manifest.yaml")
    }

    fn log_path(&self, thread_id: &str) -> PathBuf {
        self.thread_dir(thread_id).join("log.jsonl")
    }

    pub fn create(&self, agent_id: &str, channel: &str, opts: CreateOpts) -> CoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now();
        let manifest = Manifest {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            channel: channel.to_string(),
            created_at: now,
            updated_at: now,
            session_id: None,
            task_id: opts.task_id,
            title: None,
        };
        std::fs::create_dir_all(self.thread_dir(&id))?;
        self.write_manifest(&manifest)?;
        std::fs::write(self.log_path(&id), "")?;
        Ok(id)
    }

    pub fn get(&self, thread_id: &str) -> CoreResult<Manifest> {
        let path = self.manifest_path(thread_id);
        if !path.exists() {
            return Err(CoreError::ThreadNotFound(thread_id.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        serde_yml::from_str(&content)
            .map_err(|e| CoreError::StoreCorruption(format!("{thread_id}: {e}")))
    }

    pub fn list(&self, agent_id: &str) -> CoreResult<Vec<Manifest>> {
        let mut result = Vec::new();
        if !self.root.exists() {
            return Ok(result);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if let Ok(manifest) = self.get(&id) {
                if manifest.agent_id == agent_id {
                    result.push(manifest);
                }
            }
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    pub fn delete(&self, thread_id: &str) -> CoreResult<()> {
        let dir = self.thread_dir(thread_id);
        if !dir.exists() {
            return Err(CoreError::ThreadNotFound(thread_id.to_string()));
        }
        std::fs::remove_dir_all(dir)?;
        Ok(())
    }

    fn write_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let yaml = serde_yml::to_string(manifest)
            .map_err(|e| CoreError::StoreCorruption(e.to_string()))?;
        std::fs::write(self.manifest_path(&manifest.id), yaml)?;
        Ok(())
    }

    /// Reads never take the per-thread lock.
    pub fn update_manifest(&self, thread_id: &str, patch: impl FnOnce(&mut Manifest)) -> CoreResult<Manifest> {
        let mut manifest = self.get(thread_id)?;
        patch(&mut manifest);
        manifest.updated_at = self.clock.now();
        self.write_manifest(&manifest)?;
        Ok(manifest)
    }

    pub fn append_event(&self, thread_id: &str, event: &Event) -> CoreResult<()> {
        if !self.thread_dir(thread_id).exists() {
            return Err(CoreError::ThreadNotFound(thread_id.to_string()));
        }
        let line = serde_json::to_string(event)
            .map_err(|e| CoreError::StoreCorruption(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(thread_id))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn append_message(&self, thread_id: &str, event: Event) -> CoreResult<()> {
        self.append_event(thread_id, &event)
    }

    pub fn load_events(&self, thread_id: &str) -> CoreResult<Vec<Event>> {
        let path = self.log_path(thread_id);
        if !path.exists() {
            return Err(CoreError::ThreadNotFound(thread_id.to_string()));
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break, // tolerate a truncated trailing line
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("skipping malformed thread event: {e}"),
            }
        }
        Ok(events)
    }

    pub fn load_messages(&self, thread_id: &str) -> CoreResult<Vec<Event>> {
        Ok(self
            .load_events(thread_id)?
            .into_iter()
            .filter(|e| matches!(e, Event::Message { .. }))
            .collect())
    }

    /// Grants exclusive access to `thread_id` for the duration of `f`,
    /// queued FIFO. The only concurrency primitive the core relies on for
    /// thread-mutating operations.
    pub async fn with_lock<F, Fut, T>(&self, thread_id: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard: ThreadLockGuard = self.locks.acquire(thread_id).await;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;

    fn store(dir: &std::path::Path) -> ThreadStore {
        ThreadStore::new(dir, Arc::new(SystemClock))
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create("assistant", "cli", CreateOpts::default()).unwrap();
        let manifest = store.get(&id).unwrap();
        assert_eq!(manifest.agent_id, "assistant");
        assert!(manifest.session_id.is_none());
    }

    #[test]
    fn append_and_load_messages_preserves_order_and_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create("assistant", "cli", CreateOpts::default()).unwrap();
        let now = Utc::now();
        store
            .append_message(&id, Event::user_message("héllo 👋", now))
            .unwrap();
        store
            .append_message(&id, Event::assistant_message("hi", now))
            .unwrap();

        let messages = store.load_messages(&id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_message().unwrap().1, "héllo 👋");
        assert_eq!(messages[1].as_message().unwrap().1, "hi");
    }

    #[test]
    fn get_on_missing_thread_is_thread_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.get("nonexistent").unwrap_err();
        assert!(matches!(err, CoreError::ThreadNotFound(_)));
    }

    #[test]
    fn corrupt_manifest_is_store_corruption_not_silent_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create("assistant", "cli", CreateOpts::default()).unwrap();
        std::fs::write(store.manifest_path(&id), "not: [valid: yaml").unwrap();
        let err = store.get(&id).unwrap_err();
        assert!(matches!(err, CoreError::StoreCorruption(_)));
    }

    #[test]
    fn update_manifest_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let id = store.create("assistant", "cli", CreateOpts::default()).unwrap();
        let before = store.get(&id).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store
            .update_manifest(&id, |m| m.session_id = Some("S1".into()))
            .unwrap();
        assert_eq!(updated.session_id.as_deref(), Some("S1"));
        assert!(updated.updated_at >= before);
    }

    #[tokio::test]
    async fn with_lock_serializes_concurrent_turns() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(dir.path()));
        let id = store.create("assistant", "cli", CreateOpts::default()).unwrap();

        let s1 = store.clone();
        let id1 = id.clone();
        let t1 = tokio::spawn(async move {
            s1.with_lock(&id1, || async {
                tokio::time::sleep(std::time::Duration::from_millis(15)).await;
                s1.append_message(&id1, Event::user_message("from t1", Utc::now()))
                    .unwrap();
            })
            .await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        let s2 = store.clone();
        let id2 = id.clone();
        let t2 = tokio::spawn(async move {
            s2.with_lock(&id2, || async {
                s2.append_message(&id2, Event::user_message("from t2", Utc::now()))
                    .unwrap();
            })
            .await;
        });

        t1.await.unwrap();
        t2.await.unwrap();

        let messages = store.load_messages(&id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_message().unwrap().1, "from t1");
        assert_eq!(messages[1].as_message().unwrap().1, "from t2");
    }
}
