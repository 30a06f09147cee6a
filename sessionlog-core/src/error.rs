use std::path::PathBuf;

use thiserror::Error;

/// Result type used across the session pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by plugins (formatters, monitors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised synchronously to the caller of a session or registry operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The resolved output folder is empty.
    #[error("empty folder name is not allowed")]
    EmptyFolder,

    /// The output folder (or a session folder below it) could not be created.
    #[error("folder '{}' could not be created", path.display())]
    FolderCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called while a session is running or suspended.
    #[error("previous session not stopped")]
    SessionNotStopped,

    /// `stop` was called while no session is running.
    #[error("no session is running")]
    SessionNotRunning,

    #[error("invalid logger name '{name}': {reason}")]
    InvalidLoggerName { name: String, reason: &'static str },

    #[error("invalid context '{context}': {reason}")]
    InvalidContext {
        context: String,
        reason: &'static str,
    },

    /// A configuration references a plugin name that is not registered.
    #[error("unknown {kind} plugin '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("{kind} plugin '{name}' is already registered")]
    DuplicatePlugin { kind: &'static str, name: String },

    #[error("invalid {kind} plugin name '{name}'")]
    InvalidPluginName { kind: &'static str, name: String },

    /// A plugin parameter expression could not be parsed.
    #[error("invalid parameter expression '{expression}': {reason}")]
    InvalidParameters { expression: String, reason: String },

    #[error("monitor '{name}' failed to initialize: {source}")]
    MonitorInit {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
