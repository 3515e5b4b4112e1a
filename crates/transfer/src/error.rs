use gridlink_connection::ConnectionError;
use gridlink_crypto::CryptoError;
use gridlink_data_channel::DataChannelError;
use gridlink_pool::PoolError;

/// Caller-facing errors of a transfer attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A negotiation or configuration precondition is not met.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cipher misuse or malformed ciphertext.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Pool or session failure while obtaining or using a connection.
    #[error("connection error: {0}")]
    Connection(#[source] ConnectionError),

    /// A stream failed while moving bytes; the attempt was aborted.
    #[error("stream failed: {0}")]
    Stream(String),

    #[error("transfer cancelled")]
    Cancelled,

    /// Every byte arrived but the whole-object checksums differ.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("invalid logical path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Connection(e) => !matches!(
                e,
                ConnectionError::AuthFailed(_)
                    | ConnectionError::MissingCredential(_)
                    | ConnectionError::Server { .. }
                    | ConnectionError::Crypto(_)
            ),
            TransferError::Stream(_) => true,
            _ => false,
        }
    }
}

impl From<CryptoError> for TransferError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Configuration(msg) => TransferError::Configuration(msg),
            CryptoError::Encryption(msg) => TransferError::Encryption(msg),
        }
    }
}

impl From<ConnectionError> for TransferError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Crypto(e) => e.into(),
            other => TransferError::Connection(other),
        }
    }
}

impl From<PoolError> for TransferError {
    fn from(err: PoolError) -> Self {
        ConnectionError::from(err).into()
    }
}

impl From<DataChannelError> for TransferError {
    fn from(err: DataChannelError) -> Self {
        match err {
            DataChannelError::Crypto(e) => e.into(),
            other => TransferError::Stream(other.to_string()),
        }
    }
}
