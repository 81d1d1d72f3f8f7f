use async_trait::async_trait;
use serde::Deserialize;

use super::{Tool, ToolBuildContext, ToolCall, ToolOutput, ToolServer};
use crate::error::CoreError;
use crate::runner::depth_error;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AskAgentArgs {
    #[serde(rename = "targetAgentId")]
    target_agent_id: String,
    message: String,
}

/// The one tool server the core specifies behaviorally (§4.7). Rules are
/// evaluated in order and each failure is a tool-level error result, never
/// a panic or a caller-turn abort — a delegation failure is recoverable by
/// the calling agent's own turn.
pub struct AskAgentTool {
    ctx: ToolBuildContext,
}

#[async_trait]
impl Tool for AskAgentTool {
    fn name(&self) -> &str {
        "ask_agent"
    }

    fn description(&self) -> &str {
        "Delegate a message to another agent on the allow-list and return its response."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "targetAgentId": { "type": "string" },
                "message": { "type": "string" }
            },
            "required": ["targetAgentId", "message"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: AskAgentArgs = match serde_json::from_value(call.args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid ask_agent arguments: {e}")),
        };

        // 1. Reject self-targeting.
        if args.target_agent_id == self.ctx.agent_id {
            return ToolOutput::err(&call.id, CoreError::DelegationSelf.to_string());
        }

        // 2. Enforce askDepth < MAX_DEPTH.
        if self.ctx.ask_depth >= self.ctx.max_depth {
            return ToolOutput::err(&call.id, depth_error(self.ctx.max_depth).to_string());
        }

        // 3. Enforce target in allow-list (or wildcard).
        let allowed = self.ctx.allowed_agents.iter().any(|a| a == "*")
            || self.ctx.allowed_agents.iter().any(|a| a == &args.target_agent_id);
        if !allowed {
            let reason = format!("agent '{}' is not on the delegation allow-list", args.target_agent_id);
            return ToolOutput::err(&call.id, CoreError::DelegationDenied(reason).to_string());
        }

        // 4. Resolve the target agent.
        if !self.ctx.known_agent_ids.contains(&args.target_agent_id) {
            let reason = format!("unknown agent '{}'", args.target_agent_id);
            return ToolOutput::err(&call.id, CoreError::DelegationDenied(reason).to_string());
        }

        // 5-6. Create a target thread and invoke the Runner, via the
        // closure the Runner handed us — it owns thread creation.
        let Some(run_agent) = self.ctx.run_agent.clone() else {
            return ToolOutput::err(&call.id, "delegation is unavailable in this context");
        };

        // 7. Target-side errors become an error tool result, never a
        // caller-turn abort.
        match run_agent(
            args.target_agent_id.clone(),
            args.message,
            self.ctx.ask_depth + 1,
            self.ctx.abort.clone(),
        )
        .await
        {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, format!("{}: {e}", args.target_agent_id)),
        }
    }
}

/// Enumerates legal delegation targets (excluding self) by intersecting
/// the workspace agent set with the caller's allow-list.
pub struct ListAvailableAgentsTool {
    ctx: ToolBuildContext,
}

#[async_trait]
impl Tool for ListAvailableAgentsTool {
    fn name(&self) -> &str {
        "list_available_agents"
    }

    fn description(&self) -> &str {
        "List agent ids this agent is allowed to delegate to."
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let wildcard = self.ctx.allowed_agents.iter().any(|a| a == "*");
        let mut targets: Vec<&String> = self
            .ctx
            .known_agent_ids
            .iter()
            .filter(|id| *id != &self.ctx.agent_id)
            .filter(|id| wildcard || self.ctx.allowed_agents.contains(id))
            .collect();
        targets.sort();
        let content = serde_json::to_string(&targets).unwrap_or_else(|_| "[]".to_string());
        ToolOutput::ok(&call.id, content)
    }
}

pub fn build_server(ctx: &ToolBuildContext) -> ToolServer {
    ToolServer::new("agents")
        .with_tool(Arc::new(AskAgentTool { ctx: ctx.clone() }))
        .with_tool(Arc::new(ListAvailableAgentsTool { ctx: ctx.clone() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AbortSignal;

    fn ctx(ask_depth: usize, allowed: Vec<&str>, known: Vec<&str>) -> ToolBuildContext {
        ToolBuildContext {
            agent_id: "a".into(),
            workspace_dir: "/ws".into(),
            thread_id: "t1".into(),
            channel: "internal".into(),
            allowed_agents: allowed.into_iter().map(String::from).collect(),
            known_agent_ids: known.into_iter().map(String::from).collect(),
            ask_depth,
            max_depth: 3,
            run_agent: Some(Arc::new(|_target, message, _depth, _abort| {
                Box::pin(async move { Ok(format!("echo: {message}")) })
            })),
            abort: AbortSignal::new(),
        }
    }

    fn call(target: &str, message: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "ask_agent".into(),
            args: serde_json::json!({ "targetAgentId": target, "message": message }),
        }
    }

    #[tokio::test]
    async fn rejects_self_targeting() {
        let tool = AskAgentTool { ctx: ctx(0, vec!["*"], vec!["a", "b"]) };
        let out = tool.execute(&call("a", "hi")).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn rejects_beyond_max_depth() {
        let tool = AskAgentTool { ctx: ctx(3, vec!["*"], vec!["a", "b"]) };
        let out = tool.execute(&call("b", "hi")).await;
        assert!(out.is_error);
        assert!(out.content.contains("delegation depth limit reached (max 3)"));
    }

    #[tokio::test]
    async fn rejects_targets_outside_allow_list() {
        let tool = AskAgentTool { ctx: ctx(0, vec!["c"], vec!["a", "b", "c"]) };
        let out = tool.execute(&call("b", "hi")).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn rejects_unknown_target() {
        let tool = AskAgentTool { ctx: ctx(0, vec!["*"], vec!["a"]) };
        let out = tool.execute(&call("ghost", "hi")).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn happy_delegation_returns_target_text() {
        let tool = AskAgentTool { ctx: ctx(0, vec!["b"], vec!["a", "b"]) };
        let out = tool.execute(&call("b", "help")).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "echo: help");
    }

    #[tokio::test]
    async fn list_available_agents_excludes_self_and_non_allowed() {
        let tool = ListAvailableAgentsTool { ctx: ctx(0, vec!["b"], vec!["a", "b", "c"]) };
        let out = tool
            .execute(&ToolCall {
                id: "1".into(),
                name: "list_available_agents".into(),
                args: serde_json::json!({}),
            })
            .await;
        assert_eq!(out.content, "[\"b\"]");
    }
}
