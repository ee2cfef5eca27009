//! Error types and exit codes for codewatch

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for codewatch operations
///
/// An empty diff is deliberately absent here: extraction reports it as
/// [`crate::extract::Extraction::Empty`] and the pipeline short-circuits cleanly.
#[derive(Error, Debug)]
pub enum CodewatchError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Repository not configured: {name}")]
    RepositoryNotFound { name: String },

    #[error("Tool invocation failed ({tool}): {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Failed to parse bundle: {message}")]
    ParseFailure { message: String },

    #[error("Model unavailable: {message}")]
    ModelUnavailable { message: String },

    #[error("Git {step} failed: {message}")]
    VersionControl { step: String, message: String },

    #[error("Semantic index error: {message}")]
    Index { message: String },

    #[error("Control channel error: {message}")]
    Control { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodewatchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    pub fn vcs(step: &str, message: impl Into<String>) -> Self {
        Self::VersionControl {
            step: step.to_string(),
            message: message.into(),
        }
    }

    /// Convert error to an exit code:
    /// - 0: Success
    /// - 1: IO / configuration error
    /// - 2: External tool invocation failure
    /// - 3: Parse failure
    /// - 4: Model unavailable / semantic index failure
    /// - 5: Git error
    /// - 6: Daemon control error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config { .. } | Self::RepositoryNotFound { .. } => ExitCode::from(1),
            Self::Io(_) | Self::Json(_) => ExitCode::from(1),
            Self::ToolInvocation { .. } => ExitCode::from(2),
            Self::ParseFailure { .. } => ExitCode::from(3),
            Self::ModelUnavailable { .. } | Self::Index { .. } => ExitCode::from(4),
            Self::VersionControl { .. } => ExitCode::from(5),
            Self::Control { .. } => ExitCode::from(6),
        }
    }
}

/// Result type alias for codewatch operations
pub type Result<T> = std::result::Result<T, CodewatchError>;
