use crate::engine::UsageInfo;
use crate::error::{CoreError, CoreResult};
use crate::time::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent_id: String,
    pub thread_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub duration_ms: u64,
    pub turns: u64,
    pub cost_usd: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub turns: u64,
}

/// Append-only JSONL usage ledger, one line per turn, same
/// `OpenOptions::append(true)` + `writeln!` idiom as the thread log.
pub struct UsageLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
}

impl UsageLog {
    pub fn new(workspace_root: &Path, clock: Arc<dyn Clock>) -> Self {
        let path = crate::workspace::state_dir(workspace_root).join("usage.jsonl");
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            clock,
        }
    }

    pub async fn append(
        &self,
        agent_id: &str,
        thread_id: &str,
        model: &str,
        usage: &UsageInfo,
        cost_usd: f64,
    ) -> CoreResult<()> {
        let record = UsageRecord {
            agent_id: agent_id.to_string(),
            thread_id: thread_id.to_string(),
            model: model.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_creation_tokens: usage.cache_creation_tokens,
            duration_ms: usage.duration_ms,
            turns: usage.turns,
            cost_usd,
            at: self.clock.now(),
        };
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&record)
            .map_err(|e| CoreError::StoreCorruption(e.to_string()))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_all(&self) -> CoreResult<Vec<UsageRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageRecord>(line) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!("skipping malformed usage record: {e}"),
            }
        }
        Ok(records)
    }

    /// Aggregate totals, optionally filtered by agent and/or a lower time bound.
    pub fn totals_for(
        &self,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> CoreResult<UsageTotals> {
        let mut totals = UsageTotals::default();
        for record in self.read_all()? {
            if let Some(id) = agent_id {
                if record.agent_id != id {
                    continue;
                }
            }
            if let Some(since) = since {
                if record.at < since {
                    continue;
                }
            }
            totals.input_tokens += record.input_tokens;
            totals.output_tokens += record.output_tokens;
            totals.cache_read_tokens += record.cache_read_tokens;
            totals.cache_creation_tokens += record.cache_creation_tokens;
            totals.duration_ms += record.duration_ms;
            totals.cost_usd += record.cost_usd;
            totals.turns += 1;
        }
        Ok(totals)
    }
}
