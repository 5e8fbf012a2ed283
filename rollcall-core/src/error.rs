//! Error types for rollcall-core.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the backing table service or the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No table carries this title.
    #[error("table '{0}' does not exist")]
    NoSuchTable(String),

    /// No table carries this numeric id. The id stays out of the message.
    #[error("addressed table does not exist")]
    NoSuchTableId(i64),

    /// A table with this title already exists.
    #[error("table '{0}' already exists")]
    DuplicateTable(String),

    /// The blob store has no object at this location.
    #[error("blob '{0}' does not exist")]
    NoSuchBlob(String),

    /// The service rejected the request (quota, malformed range, permissions).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The service could not be reached or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// All errors a data-access or coordination operation can surface to its caller.
///
/// Messages are user-facing: they name tables and identities but never row
/// positions or numeric table ids.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A table, row identity, or sub-table does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A precondition no longer held after taking the lock and re-reading.
    #[error("{0}")]
    Conflict(String),

    /// The caller does not hold the position the operation requires.
    #[error("not permitted: {0}")]
    Forbidden(String),

    /// Malformed input, rejected before any lock or I/O.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The backing service failed mid-operation; its true state is unknown.
    #[error("backing service failure: {0}")]
    Backing(#[from] BackendError),

    /// A bounded lock wait elapsed before the named section became free.
    #[error("resource '{name}' is busy; retry later")]
    Busy { name: String },

    /// The critical-section task panicked or the runtime shut down under it.
    #[error("operation on '{name}' was interrupted")]
    Interrupted { name: String },
}

impl StoreError {
    /// Convenience constructor for [`StoreError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }
}

/// Errors raised while loading [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
