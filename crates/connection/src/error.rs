use std::time::Duration;

use gridlink_crypto::CryptoError;
use gridlink_data_channel::DataChannelError;
use gridlink_pool::PoolError;

/// Errors from opening, using or pooling server sessions.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Pool(PoolError),

    #[error("no credential registered for {0}")]
    MissingCredential(String),
}

impl ConnectionError {
    /// Unwraps factory errors so callers see the original session failure
    /// instead of a pool wrapper.
    pub fn from_pool(err: PoolError) -> Self {
        match err {
            PoolError::Factory(source) => match source.downcast::<ConnectionError>() {
                Ok(inner) => *inner,
                Err(other) => ConnectionError::Pool(PoolError::Factory(other)),
            },
            other => ConnectionError::Pool(other),
        }
    }

    /// Whether the socket can no longer be trusted after this error.
    pub fn breaks_connection(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_) | ConnectionError::Protocol(_) | ConnectionError::Timeout(_)
        )
    }
}

impl From<DataChannelError> for ConnectionError {
    fn from(err: DataChannelError) -> Self {
        match err {
            DataChannelError::Io(e) => ConnectionError::Io(e),
            DataChannelError::Protocol(msg) => ConnectionError::Protocol(msg),
            DataChannelError::Crypto(e) => ConnectionError::Crypto(e),
            DataChannelError::Json(e) => ConnectionError::Protocol(e.to_string()),
        }
    }
}

impl From<PoolError> for ConnectionError {
    fn from(err: PoolError) -> Self {
        ConnectionError::from_pool(err)
    }
}
