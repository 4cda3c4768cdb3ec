//! Error types for the remote sandbox boundary.

use crate::execution::TimeoutError;

/// Failure talking to the remote sandbox server.
///
/// These never reach the caller of `Sandbox::execute` as `Err`; they are
/// folded into a failed `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never completed: connection refused, reset, DNS...
    #[error("sandbox server unreachable: {0}")]
    Transport(String),

    /// Non-success status whose body is not a query result
    #[error("sandbox server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Success status with a body that is not a query result
    #[error("invalid response from sandbox server: {0}")]
    Decode(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}
