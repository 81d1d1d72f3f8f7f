use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineCallbacks;
use crate::error::{CoreError, CoreResult};
use crate::runner::{AgentRunner, RunAgentOptions};
use crate::thread::{CreateOpts, ThreadStore};
use crate::time::Clock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub agent_id: String,
    pub cron: String,
    #[serde(default)]
    pub tz: Option<String>,
    pub prompt: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

/// Persistent store of cron triggers, one JSON array file per workspace —
/// triggers are mutable records (unlike the thread log), so a whole-file
/// rewrite on every mutation is the simplest correct storage here.
pub struct TriggerStore {
    path: PathBuf,
}

impl TriggerStore {
    pub fn new(workspace_root: &std::path::Path) -> Self {
        Self {
            path: crate::workspace::state_dir(workspace_root).join("triggers.json"),
        }
    }

    fn load(&self) -> CoreResult<Vec<Trigger>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    fn save(&self, triggers: &[Trigger]) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(triggers)
            .map_err(|e| crate::error::CoreError::StoreCorruption(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn list(&self) -> CoreResult<Vec<Trigger>> {
        self.load()
    }

    pub fn create(&self, agent_id: &str, cron: &str, tz: Option<String>, prompt: &str) -> CoreResult<Trigger> {
        let mut triggers = self.load()?;
        let trigger = Trigger {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            cron: cron.to_string(),
            tz,
            prompt: prompt.to_string(),
            enabled: true,
            last_run: None,
        };
        triggers.push(trigger.clone());
        self.save(&triggers)?;
        Ok(trigger)
    }

    fn set_last_run(&self, id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        let mut triggers = self.load()?;
        if let Some(t) = triggers.iter_mut().find(|t| t.id == id) {
            t.last_run = Some(at);
        }
        self.save(&triggers)
    }

    /// Saving with unchanged fields must not advance `lastRun`: callers
    /// diff first and only call `set_last_run` when a fire actually occurs.
    pub fn update(&self, id: &str, patch: impl FnOnce(&mut Trigger)) -> CoreResult<Trigger> {
        let mut triggers = self.load()?;
        let trigger = triggers
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| crate::error::CoreError::ValidationError(format!("unknown trigger '{id}'")))?;
        patch(trigger);
        let updated = trigger.clone();
        self.save(&triggers)?;
        Ok(updated)
    }
}

fn resolve_tz(tz: Option<&str>) -> Tz {
    tz.and_then(|s| Tz::from_str(s).ok()).unwrap_or(Tz::UTC)
}

/// Cron strings in this system are the standard 5-field unix form; the
/// `cron` crate parses 6-field (seconds-first) expressions, so a literal
/// "0 " is prefixed before parsing.
fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {expr}"))
}

fn previous_occurrence(schedule: &Schedule, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let now_tz = now.with_timezone(&tz);
    let lookback = now_tz - Duration::days(2);
    schedule
        .after(&lookback)
        .take_while(|t| *t <= now_tz)
        .last()
        .map(|t| t.with_timezone(&Utc))
}

/// Minute-resolution tick over all persisted triggers. Fires **at most
/// once per scheduled instant**: `lastRun` is persisted before the turn is
/// launched, so a crash between the two leaves the trigger looking
/// already-fired rather than double-firing on restart.
pub struct TriggerScheduler {
    store: Arc<TriggerStore>,
    runner: Arc<AgentRunner>,
    threads: Arc<ThreadStore>,
    clock: Arc<dyn Clock>,
}

impl TriggerScheduler {
    pub fn new(
        store: Arc<TriggerStore>,
        runner: Arc<AgentRunner>,
        threads: Arc<ThreadStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, runner, threads, clock }
    }

    pub async fn tick(&self) {
        let now = self.clock.now();
        let triggers = match self.store.list() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("failed to load triggers: {e}");
                return;
            }
        };

        for trigger in triggers {
            if !trigger.enabled {
                continue;
            }
            self.evaluate_one(trigger, now).await;
        }
    }

    async fn evaluate_one(&self, trigger: Trigger, now: DateTime<Utc>) {
        let schedule = match parse_schedule(&trigger.cron) {
            Ok(s) => s,
            Err(e) => {
                let err = CoreError::CronInvalid(e.to_string());
                tracing::warn!("trigger {} has invalid cron '{}': {err}", trigger.id, trigger.cron);
                return;
            }
        };
        let tz = resolve_tz(trigger.tz.as_deref());

        let Some(last_run) = trigger.last_run else {
            // Never fire on first sighting.
            if let Err(e) = self.store.set_last_run(&trigger.id, now) {
                tracing::warn!("failed to bootstrap lastRun for trigger {}: {e}", trigger.id);
            }
            return;
        };

        let Some(prev) = previous_occurrence(&schedule, tz, now) else {
            return;
        };
        if prev <= last_run {
            return;
        }

        // lastRun persists before the turn launches: at-most-once even
        // across a crash between these two steps.
        if let Err(e) = self.store.set_last_run(&trigger.id, now) {
            tracing::warn!("failed to persist lastRun for trigger {}: {e}", trigger.id);
            return;
        }

        let thread_id = match self.threads.create(&trigger.agent_id, "scheduled", CreateOpts::default()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("failed to create thread for trigger {}: {e}", trigger.id);
                return;
            }
        };

        let mut options = RunAgentOptions::default();
        options.background = true;
        if let Err(e) = self
            .runner
            .run_agent(&trigger.agent_id, &thread_id, &trigger.prompt, EngineCallbacks::default(), options)
            .await
        {
            tracing::warn!("trigger {} run failed: {e}", trigger.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trigger_does_not_fire_on_first_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let store = TriggerStore::new(dir.path());
        let trigger = store.create("assistant", "*/5 * * * *", None, "do work").unwrap();
        assert!(trigger.last_run.is_none());
    }

    #[test]
    fn unchanged_update_does_not_advance_last_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = TriggerStore::new(dir.path());
        let trigger = store.create("assistant", "*/5 * * * *", None, "do work").unwrap();
        let updated = store.update(&trigger.id, |t| t.prompt = t.prompt.clone()).unwrap();
        assert_eq!(updated.last_run, trigger.last_run);
    }

    #[test]
    fn previous_occurrence_is_none_before_any_scheduled_instant() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:30Z").unwrap().with_timezone(&Utc);
        let prev = previous_occurrence(&schedule, Tz::UTC, now);
        assert_eq!(prev, Some(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)));
    }

    #[test]
    fn invalid_cron_is_rejected_by_the_parser() {
        assert!(parse_schedule("not a cron expr").is_err());
    }
}
