use crate::error::{CoreError, CoreResult};

/// The closed set of capability names the registry recognizes. Unknown names
/// are a validation error, never a silently dropped capability.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "memory",
    "history",
    "tasks",
    "notes",
    "self",
    "media",
    "secrets",
    "agents",
    "agent-management",
    "triggers",
    "browser",
];

pub fn validate_capabilities(names: &[String]) -> CoreResult<()> {
    for name in names {
        if !KNOWN_CAPABILITIES.contains(&name.as_str()) {
            return Err(CoreError::CapabilityUnknown(name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_capabilities_pass() {
        let caps = vec!["memory".to_string(), "tasks".to_string()];
        assert!(validate_capabilities(&caps).is_ok());
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let caps = vec!["memory".to_string(), "teleportation".to_string()];
        let err = validate_capabilities(&caps).unwrap_err();
        match err {
            CoreError::CapabilityUnknown(name) => assert_eq!(name, "teleportation"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
