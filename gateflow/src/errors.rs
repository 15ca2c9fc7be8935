//! Error types for the gateflow crate.
//!
//! Per-item failures inside a gate never surface as these errors: they are
//! collected and folded into the gate verdict. The types here cover the
//! infrastructure around the gate (disk, status store, snapshot encoding).

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for gateflow operations.
#[derive(Debug, Error)]
pub enum GateflowError {
    /// The status store could not be read or written.
    #[error("Status store error: {0}")]
    Status(String),

    /// A stage name is not part of the active pipeline definition.
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// The execution environment could not be assembled.
    #[error("{0}")]
    Environment(#[from] EnvironmentError),

    /// An execution snapshot could not be encoded or decoded.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// A chart could not be rendered or written.
    #[error("Chart error: {0}")]
    Chart(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A script stage failed.
    #[error("Script stage '{stage}' failed: {reason}")]
    Script {
        /// The script stage name.
        stage: String,
        /// The reason for failure.
        reason: String,
    },

    /// A gate task could not be joined.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateflowError {
    /// Creates a script stage error.
    #[must_use]
    pub fn script(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Script {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading tabular files into an execution namespace.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The data directory does not exist or cannot be listed.
    #[error("Data directory {path} is not readable: {source}")]
    DataDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A table file could not be parsed.
    #[error("Failed to load table '{table}' from {path}: {reason}")]
    Table {
        /// The table name (file stem).
        table: String,
        /// The file path.
        path: PathBuf,
        /// Why loading failed.
        reason: String,
    },
}

impl EnvironmentError {
    /// Creates a table loading error.
    #[must_use]
    pub fn table(table: impl Into<String>, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Table {
            table: table.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = GateflowError> = std::result::Result<T, E>;
