use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification used by the engine to decide how far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Oracle unreachable: abandon the current URL.
    Connection,
    /// Oracle reply unusable: abandon the current flow.
    Protocol,
    /// A control could not be interacted with: log and keep going.
    TransientInteraction,
    /// Marker overlay failed: keep the raw screenshot.
    Annotation,
    /// Anything else is fatal for the operation that raised it.
    Fatal,
}

#[derive(Debug, Error)]
pub enum ExplorerError {
    /// Oracle connection could not be established
    #[error("failed to connect to oracle at {endpoint}: {reason}")]
    OracleConnect { endpoint: String, reason: String },

    /// Oracle closed the connection or the transport failed mid-exchange
    #[error("oracle connection lost: {0}")]
    OracleDisconnected(String),

    /// Oracle reply could not be turned into a decision
    #[error("oracle protocol error: {0}")]
    Protocol(String),

    /// Oracle did not reply in time; the flow is abandoned
    #[error("oracle did not reply within {0:?}")]
    OracleTimeout(Duration),

    /// A select, input or navigation step did not go through
    #[error("{action} skipped: {reason}")]
    Interaction { action: String, reason: String },

    /// Marker overlay failed; the raw artifact is still valid
    #[error("failed to annotate {path}: {reason}")]
    Annotation { path: PathBuf, reason: String },

    /// Rendering session reported a failure
    #[error("browser error ({context}): {message}")]
    Browser { context: String, message: String },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error ({context}): {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExplorerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExplorerError::OracleConnect { .. } => ErrorKind::Connection,
            ExplorerError::OracleDisconnected(_)
            | ExplorerError::Protocol(_)
            | ExplorerError::OracleTimeout(_) => ErrorKind::Protocol,
            ExplorerError::Interaction { .. } => ErrorKind::TransientInteraction,
            ExplorerError::Annotation { .. } => ErrorKind::Annotation,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn browser(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ExplorerError::Browser {
            context: context.into(),
            message: err.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ExplorerError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn interaction(action: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ExplorerError::Interaction {
            action: action.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
