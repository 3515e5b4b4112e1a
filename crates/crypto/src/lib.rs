//! Session security for the gridlink client.
//!
//! The flow for one server session:
//! 1. [`NegotiationEngine::negotiate`] crosses the client and server SSL
//!    policies and produces a [`NegotiatedSession`].
//! 2. For SSL sessions, [`derive_key`] fills the session's secret key exactly
//!    once (PBKDF2-HMAC-SHA1 over random password and salt).
//! 3. [`EncryptionWrapperFactory`] hands out an [`Encryptor`] / [`Decryptor`]
//!    per stream. Each must be [`init`](EncryptionCodec::init)ialized before
//!    use; every buffer gets a fresh random IV.

mod codec;
mod error;
mod factory;
mod kdf;
mod negotiate;
mod session;

pub use codec::{Decryptor, EncryptedBuffer, EncryptionCodec, Encryptor, IV_LEN};
pub use error::CryptoError;
pub use factory::EncryptionWrapperFactory;
pub use kdf::derive_key;
pub use negotiate::NegotiationEngine;
pub use session::NegotiatedSession;
