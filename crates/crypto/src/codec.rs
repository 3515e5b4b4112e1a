use std::sync::Arc;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use zeroize::Zeroizing;

use gridlink_protocol::{EncryptionAlgorithm, PipelineConfiguration};

use crate::error::CryptoError;
use crate::session::NegotiatedSession;

/// AES block size, and therefore the IV length for every CBC variant.
pub const IV_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// One encrypted buffer as it travels on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBuffer {
    pub initialization_vector: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Lifecycle shared by both codec directions.
pub trait EncryptionCodec {
    /// Activates the codec. Checks that the session key exists and that its
    /// length matches the configured and the negotiated key size.
    fn init(&mut self) -> Result<(), CryptoError>;

    fn is_initialized(&self) -> bool;
}

/// Key material and parameters common to both directions.
struct CodecCore {
    config: PipelineConfiguration,
    session: Arc<NegotiatedSession>,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl CodecCore {
    fn new(config: PipelineConfiguration, session: Arc<NegotiatedSession>) -> Self {
        Self {
            config,
            session,
            key: None,
        }
    }

    fn init(&mut self) -> Result<(), CryptoError> {
        self.ensure_ssl()?;

        let key = self
            .session
            .key()
            .ok_or_else(|| CryptoError::encryption("session key has not been derived"))?;
        let key_bits = key.len() as u32 * 8;

        if key_bits != self.config.encryption_key_size {
            return Err(CryptoError::encryption(format!(
                "key is {key_bits} bits but the codec is configured for {}",
                self.config.encryption_key_size
            )));
        }
        if key_bits != self.session.key_size() {
            return Err(CryptoError::encryption(format!(
                "key is {key_bits} bits but the session negotiated {}",
                self.session.key_size()
            )));
        }
        if self.config.encryption_algorithm.key_bits() != Some(key_bits) {
            return Err(CryptoError::encryption(format!(
                "{} cannot use a {key_bits}-bit key",
                self.config.encryption_algorithm
            )));
        }

        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn ensure_ssl(&self) -> Result<(), CryptoError> {
        if self.session.is_ssl() {
            Ok(())
        } else {
            Err(CryptoError::configuration(
                "encryption is not available on a plaintext session",
            ))
        }
    }

    /// Returns the active key, or the appropriate error for the codec state.
    fn active_key(&self) -> Result<&[u8], CryptoError> {
        self.ensure_ssl()?;
        self.key
            .as_deref()
            .map(|k| k.as_slice())
            .ok_or_else(|| CryptoError::encryption("codec used before init()"))
    }
}

/// Encrypts outgoing buffers. Owns its IV source, so each stream worker
/// needs its own encryptor.
pub struct Encryptor {
    core: CodecCore,
    iv_source: StdRng,
}

impl Encryptor {
    pub(crate) fn new(config: PipelineConfiguration, session: Arc<NegotiatedSession>) -> Self {
        Self {
            core: CodecCore::new(config, session),
            iv_source: StdRng::from_entropy(),
        }
    }

    /// Encrypts one buffer under a fresh random IV.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedBuffer, CryptoError> {
        let key = self.core.active_key()?;

        let mut iv = [0u8; IV_LEN];
        self.iv_source.fill_bytes(&mut iv);

        let ciphertext = cbc_encrypt(&self.core.config.encryption_algorithm, key, &iv, plaintext)?;
        Ok(EncryptedBuffer {
            initialization_vector: iv.to_vec(),
            ciphertext,
        })
    }
}

impl EncryptionCodec for Encryptor {
    fn init(&mut self) -> Result<(), CryptoError> {
        self.core.init()
    }

    fn is_initialized(&self) -> bool {
        self.core.key.is_some()
    }
}

/// Decrypts incoming buffers.
pub struct Decryptor {
    core: CodecCore,
}

impl Decryptor {
    pub(crate) fn new(config: PipelineConfiguration, session: Arc<NegotiatedSession>) -> Self {
        Self {
            core: CodecCore::new(config, session),
        }
    }

    pub fn decrypt(&self, buffer: &EncryptedBuffer) -> Result<Vec<u8>, CryptoError> {
        let key = self.core.active_key()?;

        if buffer.initialization_vector.len() != IV_LEN {
            return Err(CryptoError::encryption(format!(
                "initialization vector must be {IV_LEN} bytes, got {}",
                buffer.initialization_vector.len()
            )));
        }
        if buffer.ciphertext.is_empty() || buffer.ciphertext.len() % IV_LEN != 0 {
            return Err(CryptoError::encryption(format!(
                "ciphertext length {} is not a positive multiple of the block size",
                buffer.ciphertext.len()
            )));
        }

        cbc_decrypt(
            &self.core.config.encryption_algorithm,
            key,
            &buffer.initialization_vector,
            &buffer.ciphertext,
        )
    }
}

impl EncryptionCodec for Decryptor {
    fn init(&mut self) -> Result<(), CryptoError> {
        self.core.init()
    }

    fn is_initialized(&self) -> bool {
        self.core.key.is_some()
    }
}

fn cbc_encrypt(
    algorithm: &EncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let bad_key = |_| CryptoError::encryption("invalid key or IV length");
    let ciphertext = match algorithm {
        EncryptionAlgorithm::Aes128Cbc => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        EncryptionAlgorithm::Aes192Cbc => Aes192CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        EncryptionAlgorithm::Aes256Cbc => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        EncryptionAlgorithm::Unsupported(name) => {
            return Err(CryptoError::configuration(format!(
                "unsupported algorithm: {name}"
            )));
        }
    };
    Ok(ciphertext)
}

fn cbc_decrypt(
    algorithm: &EncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let bad_key = |_| CryptoError::encryption("invalid key or IV length");
    let bad_padding = |_| CryptoError::encryption("invalid padding");
    match algorithm {
        EncryptionAlgorithm::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_padding),
        EncryptionAlgorithm::Aes192Cbc => Aes192CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_padding),
        EncryptionAlgorithm::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(bad_padding),
        EncryptionAlgorithm::Unsupported(name) => Err(CryptoError::configuration(format!(
            "unsupported algorithm: {name}"
        ))),
    }
}
