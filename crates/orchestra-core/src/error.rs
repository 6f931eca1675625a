//! Crate-level error taxonomy for Orchestra.
//!
//! Per-agent and per-evaluator failures are not errors at this level: they
//! are recorded as [`crate::dispatch::DispatchFailure`] values and surfaced
//! as annotations. Only whole-pipeline failures end up here.

use crate::apply::ApplyError;
use crate::backup::BackupError;

/// Orchestra pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    #[error("no agents available (requested: {})", requested.join(", "))]
    NoAgentsAvailable { requested: Vec<String> },

    #[error("duplicate agent in registry: {0}")]
    DuplicateAgent(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("solution not found: {0}")]
    SolutionNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Orchestra operations.
pub type Result<T> = std::result::Result<T, OrchestraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_agents_lists_requested_names() {
        let err = OrchestraError::NoAgentsAvailable {
            requested: vec!["claude".to_string(), "gemini".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("no agents available"));
        assert!(msg.contains("claude, gemini"));
    }

    #[test]
    fn test_invalid_path_display() {
        let err = OrchestraError::InvalidPath {
            path: "../etc/passwd".to_string(),
            reason: "escapes the working directory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("../etc/passwd"));
        assert!(msg.contains("escapes"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: OrchestraError = io.into();
        assert!(err.to_string().starts_with("io error"));
    }
}
