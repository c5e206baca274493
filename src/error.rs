use thiserror::Error;

/// Run tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Run already active")]
    AlreadyRunning,

    #[error("No active run")]
    NotRunning,

    #[error("Invalid run state: {0}")]
    InvalidState(String),

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Failures of the remote progress service.
///
/// These never abort local tracking; callers log them and carry on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Remote service not configured")]
    Offline,

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::Http(status.as_u16())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}
