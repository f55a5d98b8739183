//! Error types for setting up and running a benchmark.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that abort a benchmark run.
///
/// Per-operation failures never show up here; they are recorded in the phase's
/// [`Report`](crate::report::Report) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The in-memory sample buffer could not be allocated.
    #[error("could not allocate a sample buffer of {size} bytes")]
    Allocation {
        /// The requested buffer size in bytes.
        size: u64,
    },

    /// A storage client could not be constructed for an endpoint.
    #[error("failed to connect to `{endpoint}`")]
    Connect {
        /// The endpoint the client was meant to bind to.
        endpoint: String,
        /// The underlying client error.
        #[source]
        cause: StorageError,
    },

    /// All workers exited before the phase received every response.
    #[error("workers exited after {received} of {expected} responses")]
    WorkersExited {
        /// Responses received before the channel closed.
        received: u64,
        /// Responses the phase was waiting for.
        expected: u64,
    },

    /// A worker or submission task panicked or was cancelled.
    #[error("benchmark task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A progress bar template failed to parse.
    #[error("invalid progress template: {0}")]
    Progress(#[from] indicatif::style::TemplateError),

    /// I/O errors while writing local files or reports.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The run summary could not be serialized.
    #[error("failed to serialize run summary: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for benchmark setup and runs.
pub type Result<T, E = Error> = std::result::Result<T, E>;
