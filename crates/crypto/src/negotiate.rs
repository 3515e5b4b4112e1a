use tracing::{debug, info};

use gridlink_protocol::{
    CapabilityDescriptor, NegotiationOutcome, PipelineConfiguration, ServerCapabilities,
};

use crate::error::CryptoError;
use crate::kdf;
use crate::session::NegotiatedSession;

/// Client half of the SSL negotiation.
#[derive(Debug, Clone)]
pub struct NegotiationEngine {
    config: PipelineConfiguration,
}

impl NegotiationEngine {
    pub fn new(config: PipelineConfiguration) -> Self {
        Self { config }
    }

    /// What this client offers the server.
    pub fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::from_config(&self.config)
    }

    /// Crosses the local policy with the server's and builds the session.
    ///
    /// For SSL sessions the server's algorithm and key parameters win.
    pub fn negotiate(&self, server: &ServerCapabilities) -> Result<NegotiatedSession, CryptoError> {
        let outcome = NegotiationOutcome::resolve(self.config.ssl_policy, server.policy);
        debug!(
            client = %self.config.ssl_policy,
            server = %server.policy,
            ?outcome,
            "SSL policy resolved"
        );

        match outcome {
            NegotiationOutcome::Failure => Err(CryptoError::configuration(format!(
                "SSL negotiation failed: client {} vs server {}",
                self.config.ssl_policy, server.policy
            ))),
            NegotiationOutcome::UseTcp => Ok(NegotiatedSession::plaintext()),
            NegotiationOutcome::UseSsl => {
                if !server.algorithm.is_supported() {
                    return Err(CryptoError::configuration(format!(
                        "server chose unsupported algorithm {}",
                        server.algorithm
                    )));
                }
                if server.algorithm.key_bits() != Some(server.key_size) {
                    return Err(CryptoError::configuration(format!(
                        "server chose {} with a {}-bit key",
                        server.algorithm, server.key_size
                    )));
                }
                if server.salt_size == 0 || server.hash_rounds == 0 {
                    return Err(CryptoError::configuration(
                        "server chose an empty salt or zero hash rounds",
                    ));
                }
                info!(algorithm = %server.algorithm, key_size = server.key_size, "SSL negotiated");
                Ok(NegotiatedSession::encrypted(
                    server.algorithm.clone(),
                    server.key_size,
                    server.salt_size,
                    server.hash_rounds,
                ))
            }
        }
    }

    /// The local configuration with the session's encryption parameters
    /// substituted. Plaintext sessions leave it unchanged.
    pub fn effective_config(&self, session: &NegotiatedSession) -> PipelineConfiguration {
        if !session.is_ssl() {
            return self.config.clone();
        }
        self.config.with_encryption_params(
            session.algorithm().clone(),
            session.key_size(),
            session.salt_size(),
            session.hash_rounds(),
        )
    }

    /// Derives the session key with the negotiated parameters.
    pub fn derive_key(&self, session: &NegotiatedSession) -> Result<(), CryptoError> {
        kdf::derive_key(&self.effective_config(session), session)
    }
}
