//! Error types for session framing.

use gridlink_crypto::CryptoError;

/// Errors produced while reading or writing session frames.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),
}
