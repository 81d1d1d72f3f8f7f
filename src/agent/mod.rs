pub mod capability;
pub mod resolver;
pub mod trust;

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use trust::Trust;

/// System agent ids that no agent-sourced mutation may touch.
pub const PROTECTED_AGENT_IDS: &[&str] = &["chief-of-staff", "agent-builder"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Responsibility {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub responsibilities: Vec<Responsibility>,
    pub trust: Trust,
    pub model: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default, rename = "allowedAgents")]
    pub allowed_agents: Vec<String>,
    #[serde(default)]
    pub subagents: Vec<String>,
}

impl Agent {
    pub fn is_protected(&self) -> bool {
        PROTECTED_AGENT_IDS.contains(&self.id.as_str())
    }

    fn from_markdown(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        if !content.starts_with("---") {
            anyhow::bail!("agent spec at {:?} must start with YAML frontmatter (---)", path);
        }
        let parts: Vec<&str> = content.splitn(3, "---").collect();
        if parts.len() < 3 {
            anyhow::bail!("agent spec at {:?} missing closing frontmatter delimiter", path);
        }
        let mut agent: Agent = serde_yml::from_str(parts[1])?;
        let body = parts[2].trim();
        if agent.instructions.is_none() && !body.is_empty() {
            agent.instructions = Some(body.to_string());
        }
        Ok(agent)
    }

    fn to_markdown(&self) -> anyhow::Result<String> {
        let yaml = serde_yml::to_string(self)?;
        let body = self.instructions.clone().unwrap_or_default();
        Ok(format!("---\n{yaml}---\n\n{body}"))
    }
}

/// Who initiated a mutation. Agent-sourced mutations are restricted: they
/// may never alter `trust`, and never target a protected id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationActor {
    User,
    Agent,
}

/// Validated CRUD layer over agent definitions, one markdown file per agent
/// under `<workspace>/agents/*.md`, grounded on the teacher's defensive
/// per-file loading: a bad file is skipped with a warning, never a hard
/// failure for the whole directory.
pub struct AgentStore {
    dir: PathBuf,
}

impl AgentStore {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            dir: crate::workspace::agents_dir(workspace_root),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.md"))
    }

    pub fn load_all(&self) -> HashMap<String, Agent> {
        let mut agents = HashMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return agents,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "md") {
                continue;
            }
            match Agent::from_markdown(&path) {
                Ok(agent) => {
                    if agents.insert(agent.id.clone(), agent).is_some() {
                        tracing::warn!("duplicate agent id at {:?}, keeping last loaded", path);
                    }
                }
                Err(e) => tracing::warn!("skipping invalid agent file {:?}: {e}", path),
            }
        }
        agents
    }

    pub fn get(&self, id: &str) -> CoreResult<Agent> {
        let path = self.path_for(id);
        Agent::from_markdown(&path).map_err(|_| CoreError::AgentNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.load_all().into_values().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn create(&self, agent: Agent, actor: MutationActor) -> CoreResult<()> {
        self.validate_mutation(&agent.id, actor)?;
        if self.path_for(&agent.id).exists() {
            return Err(CoreError::ValidationError(format!(
                "agent '{}' already exists",
                agent.id
            )));
        }
        self.write(&agent)
    }

    pub fn update(&self, id: &str, mut patch: impl FnMut(&mut Agent), actor: MutationActor) -> CoreResult<Agent> {
        self.validate_mutation(id, actor)?;
        let mut agent = self.get(id)?;
        let trust_before = agent.trust;
        patch(&mut agent);
        if actor == MutationActor::Agent && !trust_same(trust_before, agent.trust) {
            return Err(CoreError::ValidationError(
                "agent-sourced mutations may not alter trust".to_string(),
            ));
        }
        self.write(&agent)?;
        Ok(agent)
    }

    pub fn delete(&self, id: &str, actor: MutationActor) -> CoreResult<()> {
        self.validate_mutation(id, actor)?;
        let path = self.path_for(id);
        if !path.exists() {
            return Err(CoreError::AgentNotFound(id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn validate_mutation(&self, id: &str, actor: MutationActor) -> CoreResult<()> {
        if actor == MutationActor::Agent && PROTECTED_AGENT_IDS.contains(&id) {
            return Err(CoreError::ValidationError(format!(
                "agent '{id}' is protected and cannot be mutated by another agent"
            )));
        }
        Ok(())
    }

    fn write(&self, agent: &Agent) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        let content = agent
            .to_markdown()
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;
        fs::write(self.path_for(&agent.id), content)?;
        Ok(())
    }
}

fn trust_same(a: Trust, b: Trust) -> bool {
    matches!(
        (a, b),
        (Trust::Sandbox, Trust::Sandbox)
            | (Trust::Controlled, Trust::Controlled)
            | (Trust::Unrestricted, Trust::Unrestricted)
    )
}
