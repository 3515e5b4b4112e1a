use std::fmt;
use std::sync::OnceLock;

use zeroize::Zeroizing;

use gridlink_protocol::EncryptionAlgorithm;

use crate::error::CryptoError;

/// Outcome of SSL negotiation for one server session.
///
/// The secret key is written at most once and is read-only afterwards, so
/// the session can be shared through an `Arc` by every codec on the
/// connection.
pub struct NegotiatedSession {
    ssl_negotiated: bool,
    algorithm: EncryptionAlgorithm,
    key_size: u32,
    salt_size: u32,
    hash_rounds: u32,
    secret_key: OnceLock<Zeroizing<Vec<u8>>>,
}

impl NegotiatedSession {
    /// A session that moves data in the clear.
    pub fn plaintext() -> Self {
        Self {
            ssl_negotiated: false,
            algorithm: EncryptionAlgorithm::default(),
            key_size: 0,
            salt_size: 0,
            hash_rounds: 0,
            secret_key: OnceLock::new(),
        }
    }

    /// An SSL session with the given parameters and no key yet.
    pub fn encrypted(
        algorithm: EncryptionAlgorithm,
        key_size: u32,
        salt_size: u32,
        hash_rounds: u32,
    ) -> Self {
        Self {
            ssl_negotiated: true,
            algorithm,
            key_size,
            salt_size,
            hash_rounds,
            secret_key: OnceLock::new(),
        }
    }

    pub fn is_ssl(&self) -> bool {
        self.ssl_negotiated
    }

    pub fn algorithm(&self) -> &EncryptionAlgorithm {
        &self.algorithm
    }

    /// Negotiated key size in bits.
    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    pub fn salt_size(&self) -> u32 {
        self.salt_size
    }

    pub fn hash_rounds(&self) -> u32 {
        self.hash_rounds
    }

    pub fn has_key(&self) -> bool {
        self.secret_key.get().is_some()
    }

    /// Installs a key received from the peer. Like derivation, this can only
    /// happen once per session.
    pub fn install_shared_key(&self, key: Vec<u8>) -> Result<(), CryptoError> {
        if !self.ssl_negotiated {
            return Err(CryptoError::configuration(
                "cannot install a key on a plaintext session",
            ));
        }
        if key.is_empty() {
            return Err(CryptoError::encryption("shared key is empty"));
        }
        self.set_key(Zeroizing::new(key))
    }

    /// Copy of the key for sending to the peer.
    pub fn export_key(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.secret_key.get().map(|k| Zeroizing::new(k.to_vec()))
    }

    pub(crate) fn set_key(&self, key: Zeroizing<Vec<u8>>) -> Result<(), CryptoError> {
        self.secret_key
            .set(key)
            .map_err(|_| CryptoError::encryption("session key has already been set"))
    }

    pub(crate) fn key(&self) -> Option<&[u8]> {
        self.secret_key.get().map(|k| k.as_slice())
    }
}

impl fmt::Debug for NegotiatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedSession")
            .field("ssl_negotiated", &self.ssl_negotiated)
            .field("algorithm", &self.algorithm)
            .field("key_size", &self.key_size)
            .field("salt_size", &self.salt_size)
            .field("hash_rounds", &self.hash_rounds)
            .field("has_key", &self.has_key())
            .finish()
    }
}
