use kiln_core::LibraryError;
use thiserror::Error;

/// Errors that cross the service boundary.
///
/// Every variant is a caller-contract violation or an internal fault.
/// Compilation problems are diagnostics and runtime faults in user
/// programs are part of a successful run result; neither appears here.
#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("unknown session id '{0}'")]
    UnknownSessionId(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("argument contract violated: {0}")]
    ArgumentContract(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for PlaygroundError {
    fn from(err: tokio::task::JoinError) -> Self {
        PlaygroundError::Internal(format!("background task failed: {err}"))
    }
}

pub type Result<T, E = PlaygroundError> = std::result::Result<T, E>;

/// Why one library could not be resolved. Logged, never returned to callers.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cannot build a location for '{path}': {reason}")]
    InvalidLocation { path: String, reason: String },
    #[error("unsupported location scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("no library at {0}")]
    NotFound(String),
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Invalid(#[from] LibraryError),
}
