use crate::agent::trust::Trust;
use crate::agent::Agent;
use chrono::{DateTime, Utc};

/// Assembles the system prompt as the ordered blocks §4.5 step 4 names.
/// Each block is optional and omitted (not emitted blank) when it has no
/// content, so sandbox agents get a visibly shorter prompt rather than a
/// prompt full of empty sections.
#[allow(clippy::too_many_arguments)]
pub fn build_system_prompt(
    agent: &Agent,
    trust: Trust,
    channel: &str,
    now: DateTime<Utc>,
    tz: &str,
    task_block: Option<&str>,
    background: bool,
    suffix: Option<&str>,
) -> String {
    let mut blocks = Vec::new();

    blocks.push(identity_block(agent));

    blocks.push(trust_block(trust));

    if !matches!(trust, Trust::Sandbox) && !agent.directories.is_empty() {
        blocks.push(directories_block(agent));
    }

    if !matches!(trust, Trust::Sandbox) && agent.capabilities.iter().any(|c| c == "memory" || c == "notes") {
        blocks.push(storage_capability_block(agent));
    }

    blocks.push(formatting_block(channel));

    blocks.push(communication_block());

    blocks.push(context_block(now, tz));

    if agent.capabilities.iter().any(|c| c == "memory") {
        blocks.push("## Memories\nRecall relevant memory entries via the memory tools before answering from scratch.".to_string());
    }

    if let Some(task) = task_block {
        blocks.push(format!("## Task context\n{task}"));
    }

    if background {
        blocks.push(
            "## Background turn\nThere is no live user watching this turn. Do not address a \
             phantom user; use `notify_user` only for output that genuinely needs surfacing."
                .to_string(),
        );
    }

    if let Some(suffix) = suffix {
        blocks.push(suffix.to_string());
    }

    blocks.join("\n\n")
}

fn identity_block(agent: &Agent) -> String {
    let identity = agent
        .identity
        .as_deref()
        .or(agent.instructions.as_deref())
        .or(agent.role.as_deref())
        .unwrap_or("You are a helpful agent.");
    let mut block = format!("## Identity\nYou are {}.\n{}", agent.name, identity);
    if !agent.responsibilities.is_empty() {
        block.push_str("\n\n### Responsibilities\n");
        for r in &agent.responsibilities {
            block.push_str(&format!("- {}: {}\n", r.title, r.content));
        }
    }
    block
}

fn trust_block(trust: Trust) -> String {
    let text = match trust {
        Trust::Sandbox => "You operate in sandbox trust: no filesystem writes, no shell, delegation only.",
        Trust::Controlled => "You operate in controlled trust: file read/write, web, notebooks, no shell.",
        Trust::Unrestricted => "You operate in unrestricted trust: full filesystem and shell access.",
    };
    format!("## Trust level\n{text}")
}

fn directories_block(agent: &Agent) -> String {
    format!(
        "## Directories\nYou may read and write within:\n{}",
        agent.directories.iter().map(|d| format!("- {d}")).collect::<Vec<_>>().join("\n")
    )
}

fn storage_capability_block(agent: &Agent) -> String {
    format!(
        "## Storage\nCapabilities available for persistence: {}.",
        agent.capabilities.join(", ")
    )
}

fn formatting_block(channel: &str) -> String {
    match channel {
        "cli" | "internal" => "## Formatting\nPlain text, no markdown tables.".to_string(),
        _ => "## Formatting\nMarkdown is supported; keep responses concise.".to_string(),
    }
}

fn communication_block() -> String {
    "## Communication\nBe direct. Ask only when genuinely blocked.".to_string()
}

fn context_block(now: DateTime<Utc>, tz: &str) -> String {
    format!("## Context\nCurrent time: {} ({tz})", now.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;

    fn agent() -> Agent {
        Agent {
            id: "a1".into(),
            name: "Assistant".into(),
            identity: Some("a calm, precise engineer".into()),
            instructions: None,
            role: None,
            responsibilities: vec![],
            trust: Trust::Controlled,
            model: "default".into(),
            capabilities: vec!["memory".into()],
            directories: vec!["/ws/src".into()],
            allowed_agents: vec![],
            subagents: vec![],
        }
    }

    #[test]
    fn sandbox_agent_gets_no_directories_block() {
        let prompt = build_system_prompt(
            &agent(),
            Trust::Sandbox,
            "cli",
            Utc::now(),
            "UTC",
            None,
            false,
            None,
        );
        assert!(!prompt.contains("## Directories"));
    }

    #[test]
    fn controlled_agent_with_directories_gets_the_block() {
        let prompt = build_system_prompt(
            &agent(),
            Trust::Controlled,
            "cli",
            Utc::now(),
            "UTC",
            None,
            false,
            None,
        );
        assert!(prompt.contains("## Directories"));
        assert!(prompt.contains("/ws/src"));
    }

    #[test]
    fn background_turn_gets_its_block() {
        let prompt = build_system_prompt(
            &agent(),
            Trust::Controlled,
            "cli",
            Utc::now(),
            "UTC",
            None,
            true,
            None,
        );
        assert!(prompt.contains("## Background turn"));
    }

    #[test]
    fn task_context_block_appended_when_bound() {
        let prompt = build_system_prompt(
            &agent(),
            Trust::Controlled,
            "cli",
            Utc::now(),
            "UTC",
            Some("Finish the migration."),
            false,
            None,
        );
        assert!(prompt.contains("## Task context"));
        assert!(prompt.contains("Finish the migration."));
    }
}
