use thiserror::Error;

/// Error kinds surfaced by the core, per the error-handling design: each
/// variant maps to a single semantic failure mode a caller can branch on,
/// independent of the store or component that raised it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("store corrupted: {0}")]
    StoreCorruption(String),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("aborted by user")]
    Aborted,

    #[error("delegation denied: {0}")]
    DelegationDenied(String),

    #[error("delegation depth limit reached (max {max}). Cannot delegate further.")]
    DelegationDepthExceeded { max: usize },

    #[error("an agent cannot delegate to itself")]
    DelegationSelf,

    #[error("invalid cron expression: {0}")]
    CronInvalid(String),

    #[error("unknown capability: {0}")]
    CapabilityUnknown(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
