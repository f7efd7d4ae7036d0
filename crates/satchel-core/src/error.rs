//! Error type for failures reported by external collaborators.
use thiserror::Error;

/// Failure returned by a [`WalletStorage`](crate::traits::WalletStorage) or
/// [`BlockExplorer`](crate::traits::BlockExplorer) call.
///
/// `body` carries the remote error payload verbatim so callers can classify it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{body}")]
pub struct ServiceError {
    /// Transport status code, if the failure came from a remote response.
    pub status: Option<u16>,
    /// Raw error body or transport message.
    pub body: String,
}

impl ServiceError {
    /// Error returned by the remote service with a status code.
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
        }
    }

    /// Error raised before a response was received.
    pub fn transport(body: impl Into<String>) -> Self {
        Self {
            status: None,
            body: body.into(),
        }
    }
}
