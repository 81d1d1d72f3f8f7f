pub mod stub;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::trust::PermissionMode;
use crate::error::CoreResult;

/// Cooperative cancellation handle. `abort()` trips the flag; engines must
/// check it between streamed chunks and close their stream promptly.
#[derive(Clone, Default)]
pub struct AbortSignal {
    tripped: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.tripped.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub duration_ms: u64,
    pub turns: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub cwd: String,
    pub directories: Vec<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub max_turns: Option<usize>,
    pub subagents: Vec<String>,
    pub servers: HashMap<String, ServerConfig>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    pub text: String,
    pub session_id: Option<String>,
    pub usage: Option<UsageInfo>,
}

/// Callbacks surfacing engine lifecycle events back to the Runner. Each is
/// optional; a Runner that doesn't care about a given callback passes a
/// no-op.
#[derive(Clone)]
pub struct EngineCallbacks {
    pub on_thinking: Arc<dyn Fn() + Send + Sync>,
    pub on_assistant_message: Arc<dyn Fn(&str) + Send + Sync>,
    pub on_tool_use: Arc<dyn Fn(&str, &Value, &str) + Send + Sync>,
    pub on_tool_use_summary: Arc<dyn Fn(&str) + Send + Sync>,
    pub on_event: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Default for EngineCallbacks {
    fn default() -> Self {
        Self {
            on_thinking: Arc::new(|| {}),
            on_assistant_message: Arc::new(|_| {}),
            on_tool_use: Arc::new(|_, _, _| {}),
            on_tool_use_summary: Arc::new(|_| {}),
            on_event: Arc::new(|_| {}),
        }
    }
}

/// Thin abstraction over the external generative SDK. The session-resume
/// retry lives inside the adapter wrapping a raw `Engine`, never in the
/// Runner — this isolates SDK quirks and keeps the Runner mockable.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn run(
        &self,
        message: &str,
        options: &EngineOptions,
        session_id: Option<&str>,
        callbacks: &EngineCallbacks,
        abort: &AbortSignal,
    ) -> CoreResult<EngineResult>;
}

/// Wraps a raw `Engine` with the session-resume-retry-once policy: if a
/// `sessionId` is supplied and the engine rejects it, retry exactly once
/// without the session id. Any further error propagates.
pub struct ResumingEngine<E: Engine> {
    inner: E,
}

impl<E: Engine> ResumingEngine<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: Engine> Engine for ResumingEngine<E> {
    async fn run(
        &self,
        message: &str,
        options: &EngineOptions,
        session_id: Option<&str>,
        callbacks: &EngineCallbacks,
        abort: &AbortSignal,
    ) -> CoreResult<EngineResult> {
        match self.inner.run(message, options, session_id, callbacks, abort).await {
            Ok(result) => Ok(result),
            Err(_) if session_id.is_some() => {
                self.inner.run(message, options, None, callbacks, abort).await
            }
            Err(e) => Err(e),
        }
    }
}
