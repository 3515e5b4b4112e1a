/// Errors from negotiation, key handling and the buffer codecs.
///
/// Neither variant is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The session or configuration does not allow the requested operation,
    /// e.g. encrypting on a plaintext session.
    #[error("encryption configuration error: {0}")]
    Configuration(String),

    /// The operation was allowed but failed, e.g. codec not initialized,
    /// key length mismatch or bad padding.
    #[error("encryption error: {0}")]
    Encryption(String),
}

impl CryptoError {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        CryptoError::Configuration(msg.into())
    }

    pub(crate) fn encryption(msg: impl Into<String>) -> Self {
        CryptoError::Encryption(msg.into())
    }
}
