//! Error taxonomy for the harness.
//!
//! Candidate-originated faults (runtime errors, timeouts, security
//! violations) are trace annotations, not errors; they never unwind
//! past the simulator. Only infrastructure faults abort a run, and
//! those are retried a bounded number of times first.

/// Why a candidate handler failed to load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("handler source failed to parse: {0}")]
    Syntax(String),

    #[error("handler source missing required shape: {0}")]
    MissingRequiredShape(String),
}

/// Harness-level errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("sandbox infrastructure fault: {0}")]
    Infrastructure(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("model request timed out after {0}s")]
    ModelTimeout(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether the orchestrator may retry the run. Only failures of the
    /// execution environment itself qualify; candidate behavior is a
    /// scorable outcome, never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarnessError::Infrastructure(_))
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::MissingRequiredShape("no process operation".to_string());
        assert!(err.to_string().contains("missing required shape"));

        let err = LoadError::Syntax("unexpected indent".to_string());
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_only_infrastructure_is_retryable() {
        assert!(HarnessError::Infrastructure("spawn failed".to_string()).is_retryable());
        assert!(!HarnessError::Load(LoadError::Syntax("bad".to_string())).is_retryable());
        assert!(!HarnessError::ModelUnavailable("ollama down".to_string()).is_retryable());
        assert!(!HarnessError::ModelTimeout(120).is_retryable());
    }
}
