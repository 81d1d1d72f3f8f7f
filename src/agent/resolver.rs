use crate::agent::capability::validate_capabilities;
use crate::agent::trust::{trust_policy, PermissionMode, Trust};
use crate::error::CoreResult;

/// Runtime collaborators the resolver needs to decide whether a capability
/// applies, without it ever touching I/O itself. `has_run_agent_fn` mirrors
/// the teacher's "is there a live engine to delegate into" check — the
/// `agents` capability is dropped rather than resolved to a broken server
/// when this is false.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub agent_id: String,
    pub agent_dir: Option<String>,
    pub workspace_dir: String,
    pub thread_id: String,
    pub channel: String,
    pub directories: Vec<String>,
    pub has_run_agent_fn: bool,
    pub allowed_agents: Vec<String>,
}

/// The output of capability resolution: a tool allow/deny list plus the set
/// of capability names to instantiate servers for. Building the actual
/// `ToolServer` instances from these names is the Tool-Server Factories'
/// job, kept out of this pure function.
#[derive(Debug, Clone)]
pub struct ResolvedCapabilities {
    pub permission_mode: PermissionMode,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub servers: Vec<String>,
}

/// Pure: `(trust, capabilities, context)` -> resolved tool surface. Same
/// inputs always yield the same output, per the determinism invariant.
pub fn resolve(
    trust: Trust,
    capabilities: &[String],
    ctx: &ResolverContext,
) -> CoreResult<ResolvedCapabilities> {
    validate_capabilities(capabilities)?;

    let policy = trust_policy(trust);
    let mut allowed_tools: Vec<String> = policy
        .allowed_builtin_tools
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut disallowed_tools = Vec::new();
    if !policy.allows_shell {
        disallowed_tools.push("shell".to_string());
    }

    let mut servers: Vec<String> = Vec::new();
    for cap in capabilities {
        if cap == "agents" && !ctx.has_run_agent_fn {
            // No live delegation path in this context (e.g. sandbox trust,
            // or depth already exhausted) — drop silently, don't error:
            // the capability is legal, just inapplicable here.
            continue;
        }
        if !servers.contains(cap) {
            servers.push(cap.clone());
        }
    }

    // ask_agent is exposed only when a delegation target is available AND
    // the caller's agent has a non-empty allow-list and isn't sandboxed.
    let ask_agent_allowed = ctx.has_run_agent_fn && !ctx.allowed_agents.is_empty() && trust != Trust::Sandbox;
    if !ask_agent_allowed {
        allowed_tools.retain(|t| t != "ask_agent");
    }

    Ok(ResolvedCapabilities {
        permission_mode: policy.permission_mode,
        allowed_tools,
        disallowed_tools,
        servers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(has_run_agent_fn: bool) -> ResolverContext {
        ctx_with_allowed_agents(has_run_agent_fn, vec!["other".to_string()])
    }

    fn ctx_with_allowed_agents(has_run_agent_fn: bool, allowed_agents: Vec<String>) -> ResolverContext {
        ResolverContext {
            agent_id: "a1".into(),
            agent_dir: None,
            workspace_dir: "/ws".into(),
            thread_id: "t1".into(),
            channel: "cli".into(),
            directories: vec![],
            has_run_agent_fn,
            allowed_agents,
        }
    }

    #[test]
    fn resolve_is_deterministic() {
        let caps = vec!["memory".to_string(), "tasks".to_string()];
        let a = resolve(Trust::Controlled, &caps, &ctx(true)).unwrap();
        let b = resolve(Trust::Controlled, &caps, &ctx(true)).unwrap();
        assert_eq!(a.servers, b.servers);
        assert_eq!(a.allowed_tools, b.allowed_tools);
    }

    #[test]
    fn sandbox_never_resolves_shell() {
        let caps = vec!["memory".to_string()];
        let resolved = resolve(Trust::Sandbox, &caps, &ctx(true)).unwrap();
        assert!(!resolved.allowed_tools.contains(&"shell".to_string()));
        assert!(resolved.disallowed_tools.contains(&"shell".to_string()));
    }

    #[test]
    fn adding_a_capability_only_grows_the_server_set() {
        let base = vec!["memory".to_string()];
        let grown = vec!["memory".to_string(), "tasks".to_string()];
        let r1 = resolve(Trust::Controlled, &base, &ctx(true)).unwrap();
        let r2 = resolve(Trust::Controlled, &grown, &ctx(true)).unwrap();
        assert!(r1.servers.iter().all(|s| r2.servers.contains(s)));
    }

    #[test]
    fn agents_capability_dropped_without_run_agent_fn() {
        let caps = vec!["agents".to_string()];
        let resolved = resolve(Trust::Controlled, &caps, &ctx(false)).unwrap();
        assert!(resolved.servers.is_empty());
    }

    #[test]
    fn unknown_capability_fails_resolution() {
        let caps = vec!["teleportation".to_string()];
        assert!(resolve(Trust::Controlled, &caps, &ctx(true)).is_err());
    }

    #[test]
    fn activating_present_capability_again_is_a_noop() {
        let caps = vec!["memory".to_string(), "memory".to_string()];
        let resolved = resolve(Trust::Controlled, &caps, &ctx(true)).unwrap();
        assert_eq!(resolved.servers, vec!["memory".to_string()]);
    }

    #[test]
    fn ask_agent_dropped_without_an_allow_list() {
        let caps = vec![];
        let resolved = resolve(Trust::Controlled, &caps, &ctx_with_allowed_agents(true, vec![])).unwrap();
        assert!(!resolved.allowed_tools.contains(&"ask_agent".to_string()));
    }

    #[test]
    fn ask_agent_dropped_for_sandboxed_agents_even_with_an_allow_list() {
        let caps = vec![];
        let resolved = resolve(Trust::Sandbox, &caps, &ctx(true)).unwrap();
        assert!(!resolved.allowed_tools.contains(&"ask_agent".to_string()));
    }

    #[test]
    fn ask_agent_present_for_controlled_agent_with_allow_list() {
        let caps = vec![];
        let resolved = resolve(Trust::Controlled, &caps, &ctx(true)).unwrap();
        assert!(resolved.allowed_tools.contains(&"ask_agent".to_string()));
    }
}
