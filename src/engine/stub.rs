use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{AbortSignal, Engine, EngineCallbacks, EngineOptions, EngineResult, UsageInfo};
use crate::error::{CoreError, CoreResult};

/// A scripted `Engine` double for exercising Runner scenarios without a
/// real generative SDK: fixed text/session/usage, an optional one-shot
/// rejection of a given stale session id, and an abort check mid-call so
/// abort-mid-turn can be exercised deterministically.
pub struct StubEngine {
    text: String,
    session_id: Option<String>,
    usage: Option<UsageInfo>,
    reject_session: Option<String>,
    calls: AtomicUsize,
    fire_tool_use: Mutex<bool>,
}

impl StubEngine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            usage: None,
            reject_session: None,
            calls: AtomicUsize::new(0),
            fire_tool_use: Mutex::new(false),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn rejecting_session(stale_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            usage: None,
            reject_session: Some(stale_id.into()),
            calls: AtomicUsize::new(0),
            fire_tool_use: Mutex::new(false),
        }
    }

    /// Emits `onToolUse` before returning, so a caller can abort in between.
    pub fn firing_tool_use(mut self) -> Self {
        self.fire_tool_use = Mutex::new(true);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for StubEngine {
    async fn run(
        &self,
        _message: &str,
        _options: &EngineOptions,
        session_id: Option<&str>,
        callbacks: &EngineCallbacks,
        abort: &AbortSignal,
    ) -> CoreResult<EngineResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let (Some(stale), Some(given)) = (&self.reject_session, session_id) {
            if stale == given {
                return Err(CoreError::EngineFailure("session expired".to_string()));
            }
        }

        if *self.fire_tool_use.lock().unwrap() {
            (callbacks.on_tool_use)("noop_tool", &serde_json::json!({}), "doing a thing");
            // Yield so a concurrently-called abort() has a chance to land.
            tokio::task::yield_now().await;
        }

        if abort.is_aborted() {
            return Err(CoreError::Aborted);
        }

        (callbacks.on_assistant_message)(&self.text);

        Ok(EngineResult {
            text: self.text.clone(),
            session_id: self.session_id.clone(),
            usage: self.usage.clone(),
        })
    }
}
