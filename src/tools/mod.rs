pub mod ask_agent;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::engine::AbortSignal;
use crate::error::CoreResult;

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A tool handler's result: content the model reads back, plus an error
/// flag. Tool servers are side-effectful collaborators — failures are
/// reported via `is_error`, never a panic.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// A single callable tool: name, schema, description, async handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

/// A named collection of tools offered to the engine for one turn.
pub struct ToolServer {
    pub name: String,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool '{}'", call.name)),
        }
    }
}

/// Resolves `name(agent_id, message, ask_depth, abort) -> response text`,
/// closing over a live `AgentRunner` without `tools` needing to depend on
/// `runner` directly (the runner module depends on `tools`, not vice
/// versa). This is exactly the context carrying "the runtime collaborators
/// the factory needs" the capability registry design calls for.
pub type RunAgentFn = Arc<
    dyn Fn(String, String, usize, AbortSignal) -> Pin<Box<dyn Future<Output = CoreResult<String>> + Send>>
        + Send
        + Sync,
>;

/// Everything a capability factory might need to build its server for one
/// turn. Keeps the Runner free of per-capability branches.
#[derive(Clone)]
pub struct ToolBuildContext {
    pub agent_id: String,
    pub workspace_dir: String,
    pub thread_id: String,
    pub channel: String,
    pub allowed_agents: Vec<String>,
    pub known_agent_ids: Vec<String>,
    pub ask_depth: usize,
    pub max_depth: usize,
    pub run_agent: Option<RunAgentFn>,
    pub abort: AbortSignal,
}

pub type CapabilityFactory = Arc<dyn Fn(&ToolBuildContext) -> ToolServer + Send + Sync>;

/// `name -> (context) -> ToolServer`. The only tool server the core
/// specifies behaviorally is `agents` (ask-agent, §4.7); the rest are
/// opaque collaborators stubbed here with a minimal illustrative handler.
pub struct ToolServerRegistry {
    factories: HashMap<&'static str, CapabilityFactory>,
}

impl ToolServerRegistry {
    pub fn build(&self, capability: &str, ctx: &ToolBuildContext) -> Option<ToolServer> {
        self.factories.get(capability).map(|f| f(ctx))
    }
}

impl Default for ToolServerRegistry {
    fn default() -> Self {
        let mut factories: HashMap<&'static str, CapabilityFactory> = HashMap::new();
        factories.insert("agents", Arc::new(|ctx| ask_agent::build_server(ctx)));
        for name in [
            "memory",
            "history",
            "tasks",
            "notes",
            "self",
            "media",
            "secrets",
            "agent-management",
            "triggers",
            "browser",
        ] {
            factories.insert(name, Arc::new(move |_ctx: &ToolBuildContext| stub_server(name)));
        }
        Self { factories }
    }
}

fn stub_server(name: &'static str) -> ToolServer {
    ToolServer::new(name).with_tool(Arc::new(EchoTool { server: name }))
}

struct EchoTool {
    server: &'static str,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Reports that this tool server is present and reachable."
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, format!("{} server ready", self.server))
    }
}
