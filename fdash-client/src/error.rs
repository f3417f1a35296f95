//! Error types for fdash-client
//!
//! Every failure surfaced to the presentation layer is one of these kinds.
//! Credential refresh and bounded poll retry are recovered internally and
//! only appear here once they exhaust their bound.

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Login rejected by the remote authority (terminal for that attempt)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No session, or the session could not be recovered
    ///
    /// The presentation layer should send the user back to login.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Upload refused by the service (message is the service's own text)
    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    /// Processing start refused by the service (e.g. quota exceeded)
    #[error("Processing start rejected: {0}")]
    StartRejected(String),

    /// Network failure or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// Job completed but the metrics/compliance pair could not be fetched
    #[error("Results incomplete: {0}")]
    ResultIncomplete(String),

    /// Unexpected non-success response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Local session storage or configuration failure
    #[error(transparent)]
    Store(#[from] fdash_common::Error),
}

impl ClientError {
    /// Copy of this error for every caller sharing one outcome
    ///
    /// Storage errors wrap non-cloneable sources and are carried as text.
    pub(crate) fn replay(&self) -> ClientError {
        match self {
            ClientError::InvalidCredentials => ClientError::InvalidCredentials,
            ClientError::Unauthenticated => ClientError::Unauthenticated,
            ClientError::UploadRejected(m) => ClientError::UploadRejected(m.clone()),
            ClientError::StartRejected(m) => ClientError::StartRejected(m.clone()),
            ClientError::Transport(m) => ClientError::Transport(m.clone()),
            ClientError::ResultIncomplete(m) => ClientError::ResultIncomplete(m.clone()),
            ClientError::Api { status, message } => ClientError::Api {
                status: *status,
                message: message.clone(),
            },
            ClientError::Parse(m) => ClientError::Parse(m.clone()),
            ClientError::Store(e) => {
                ClientError::Store(fdash_common::Error::Internal(e.to_string()))
            }
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Store(fdash_common::Error::Io(err))
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
