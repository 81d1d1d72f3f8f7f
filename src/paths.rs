use std::path::PathBuf;
use std::sync::OnceLock;

static CONCLAVE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the Conclave home directory (`~/.conclave/`).
/// Supports `$CONCLAVE_HOME` env override. Cached via `OnceLock`.
pub fn conclave_home() -> &'static PathBuf {
    CONCLAVE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("CONCLAVE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".conclave")
    })
}

/// `~/.conclave/config/`
pub fn config_dir() -> PathBuf {
    conclave_home().join("config")
}

/// `~/.conclave/data/`
pub fn data_dir() -> PathBuf {
    conclave_home().join("data")
}

/// `~/.conclave/logs/`
pub fn logs_dir() -> PathBuf {
    conclave_home().join("logs")
}

/// `~/.conclave/agents/` — global agent definitions, shared across workspaces.
pub fn global_agents_dir() -> PathBuf {
    conclave_home().join("agents")
}
