//! Error types for buildstash
//!
//! All modules use `StashResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for buildstash operations
pub type StashResult<T> = Result<T, StashError>;

/// All errors that can occur in buildstash
#[derive(Error, Debug)]
pub enum StashError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown cache type: {0}")]
    UnknownCacheType(String),

    #[error("No caches configured")]
    NoCachesConfigured,

    #[error("Invalid executor configuration: {0}")]
    ExecutorInvalid(String),

    // Filter errors
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // Remote boundary errors
    #[error("Execution node failed: {message}")]
    Remote { message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Execution channel was abandoned by an interrupted request")]
    ChannelAbandoned,

    #[error("Failed to start agent: {command}")]
    AgentSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Interrupted,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StashError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an error reported by the execution node
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Whether the operation was cancelled rather than failed
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoCachesConfigured => {
                Some("Add a [[caches]] entry to .buildstash.toml or the global config")
            }
            Self::UnknownCacheType(_) => Some("Supported cache types: arbitrary"),
            Self::ExecutorInvalid(_) => {
                Some("Set executor.kind to \"local\", or \"process\" with a non-empty executor.command")
            }
            Self::ChannelAbandoned => Some("Start a new buildstash invocation"),
            Self::AgentSpawn { .. } => {
                Some("Check executor.command; it must start `buildstash agent` on the executor")
            }
            _ => None,
        }
    }
}
