use thiserror::Error;

/// Main error type for the coordination core
#[derive(Error, Debug)]
pub enum ConductorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    // Execution errors
    #[error("Coordinator timed out after {elapsed_ms}ms with no successful task")]
    CoordinatorTimeout { elapsed_ms: u64 },

    #[error("Agent {agent_id} unavailable: {reason}")]
    AgentUnavailable { agent_id: String, reason: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for ConductorError
pub type Result<T> = std::result::Result<T, ConductorError>;

impl ConductorError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        ConductorError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Configuration problems that must stop startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConductorError::Config(_)
                | ConductorError::UnknownAgent(_)
                | ConductorError::DuplicateAgent(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_agent_is_fatal() {
        assert!(ConductorError::UnknownAgent("math".into()).is_fatal());
        assert!(!ConductorError::CoordinatorTimeout { elapsed_ms: 10 }.is_fatal());
    }

    #[test]
    fn unavailable_agent_message_names_reason() {
        let err = ConductorError::AgentUnavailable {
            agent_id: "math".into(),
            reason: "no executor attached".into(),
        };
        assert_eq!(err.to_string(), "Agent math unavailable: no executor attached");
        assert!(!err.is_fatal());
    }

    #[test]
    fn transition_error_message() {
        let err = ConductorError::invalid_transition("Succeeded", "Running");
        assert_eq!(
            err.to_string(),
            "Invalid state transition: from Succeeded to Running"
        );
    }
}
