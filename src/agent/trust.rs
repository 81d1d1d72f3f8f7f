use serde::{Deserialize, Serialize};

/// User-controlled trust level. Never altered by an agent-sourced mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    Sandbox,
    Controlled,
    Unrestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    DontAsk,
    BypassPermissions,
}

/// The fixed trust -> tool-surface table from the trust policy.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    pub permission_mode: PermissionMode,
    pub allowed_builtin_tools: &'static [&'static str],
    pub allows_shell: bool,
    pub mcp_namespaces: &'static [&'static str],
}

const SANDBOX_BUILTINS: &[&str] = &["web_search", "web_fetch"];
const CONTROLLED_BUILTINS: &[&str] = &[
    "web_search",
    "web_fetch",
    "ask_agent",
    "read_file",
    "write_file",
    "edit_file",
    "notebook",
];
const ALL_BUILTINS: &[&str] = &[
    "web_search",
    "web_fetch",
    "ask_agent",
    "read_file",
    "write_file",
    "edit_file",
    "notebook",
    "shell",
];

const SANDBOX_MCP: &[&str] = &["memory:*", "triggers:*", "usage:*", "suggest-edit:*"];

/// Pure lookup, `trust` -> allowed surface. No I/O, no context needed.
pub fn trust_policy(trust: Trust) -> TrustPolicy {
    match trust {
        Trust::Sandbox => TrustPolicy {
            permission_mode: PermissionMode::DontAsk,
            allowed_builtin_tools: SANDBOX_BUILTINS,
            allows_shell: false,
            mcp_namespaces: SANDBOX_MCP,
        },
        Trust::Controlled => TrustPolicy {
            permission_mode: PermissionMode::DontAsk,
            allowed_builtin_tools: CONTROLLED_BUILTINS,
            allows_shell: false,
            mcp_namespaces: &["*"],
        },
        Trust::Unrestricted => TrustPolicy {
            permission_mode: PermissionMode::BypassPermissions,
            allowed_builtin_tools: ALL_BUILTINS,
            allows_shell: true,
            mcp_namespaces: &["*"],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_never_allows_shell() {
        assert!(!trust_policy(Trust::Sandbox).allows_shell);
        assert!(!trust_policy(Trust::Controlled).allows_shell);
        assert!(trust_policy(Trust::Unrestricted).allows_shell);
    }

    #[test]
    fn sandbox_mcp_namespaces_are_the_narrow_set() {
        let policy = trust_policy(Trust::Sandbox);
        assert!(policy.mcp_namespaces.contains(&"memory:*"));
        assert!(!policy.mcp_namespaces.contains(&"*"));
    }
}
