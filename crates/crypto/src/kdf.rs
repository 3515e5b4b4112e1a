use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use tracing::debug;
use zeroize::Zeroizing;

use gridlink_protocol::PipelineConfiguration;

use crate::error::CryptoError;
use crate::session::NegotiatedSession;

/// Derives the session key and stores it in `session`.
///
/// Runs PBKDF2-HMAC-SHA1 over a random password of `key_size / 8` bytes and
/// a random salt of `encryption_salt_size` bytes, with
/// `encryption_hash_rounds` iterations. The key can only be set once per
/// session.
pub fn derive_key(
    config: &PipelineConfiguration,
    session: &NegotiatedSession,
) -> Result<(), CryptoError> {
    if !session.is_ssl() {
        return Err(CryptoError::configuration(
            "key derivation requires an SSL session",
        ));
    }
    if session.has_key() {
        return Err(CryptoError::encryption("session key has already been derived"));
    }

    let key_bits = config.encryption_key_size;
    if !matches!(key_bits, 128 | 192 | 256) {
        return Err(CryptoError::configuration(format!(
            "unsupported key size: {key_bits} bits"
        )));
    }
    if config.encryption_salt_size == 0 || config.encryption_hash_rounds == 0 {
        return Err(CryptoError::configuration(
            "salt size and hash rounds must be non-zero",
        ));
    }

    let key_len = (key_bits / 8) as usize;
    let mut password = Zeroizing::new(vec![0u8; key_len]);
    let mut salt = vec![0u8; config.encryption_salt_size as usize];
    OsRng.fill_bytes(&mut password);
    OsRng.fill_bytes(&mut salt);

    let mut key = Zeroizing::new(vec![0u8; key_len]);
    pbkdf2::pbkdf2_hmac::<Sha1>(&password, &salt, config.encryption_hash_rounds, &mut key);

    session.set_key(key)?;
    debug!(
        key_bits,
        rounds = config.encryption_hash_rounds,
        "session key derived"
    );
    Ok(())
}
