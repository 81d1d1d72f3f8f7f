use anyhow::Result;
use std::path::{Path, PathBuf};

/// Resolves the workspace root: an explicit override, else the nearest
/// ancestor directory holding a `.git`, else the current directory.
pub fn resolve_workspace_root(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p);
    }

    let cwd = std::env::current_dir()?;
    Ok(find_git_root(&cwd).unwrap_or(cwd))
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}

/// `<workspace>/.conclave/` — per-workspace state root (threads, usage log).
pub fn state_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".conclave")
}

/// `<workspace>/agents/` — per-workspace agent definitions.
pub fn agents_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("agents")
}
