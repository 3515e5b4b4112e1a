use std::sync::Arc;

use gridlink_protocol::PipelineConfiguration;

use crate::codec::{Decryptor, Encryptor};
use crate::error::CryptoError;
use crate::session::NegotiatedSession;

/// Builds codecs for a negotiated session.
///
/// Returned codecs are inert until [`init`](crate::EncryptionCodec::init)
/// is called.
pub struct EncryptionWrapperFactory;

impl EncryptionWrapperFactory {
    pub fn encryptor(
        config: &PipelineConfiguration,
        session: Arc<NegotiatedSession>,
    ) -> Result<Encryptor, CryptoError> {
        Self::check(config, &session)?;
        Ok(Encryptor::new(config.clone(), session))
    }

    pub fn decryptor(
        config: &PipelineConfiguration,
        session: Arc<NegotiatedSession>,
    ) -> Result<Decryptor, CryptoError> {
        Self::check(config, &session)?;
        Ok(Decryptor::new(config.clone(), session))
    }

    fn check(config: &PipelineConfiguration, session: &NegotiatedSession) -> Result<(), CryptoError> {
        if !session.is_ssl() {
            return Err(CryptoError::configuration(
                "no encryption codec for a session without SSL",
            ));
        }
        if !config.encryption_algorithm.is_supported() {
            return Err(CryptoError::configuration(format!(
                "unsupported encryption algorithm: {}",
                config.encryption_algorithm
            )));
        }
        Ok(())
    }
}
