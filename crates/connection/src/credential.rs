use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use gridlink_protocol::AccountIdentity;

/// A password held in memory for challenge/response login.
#[derive(Clone)]
pub struct Credential {
    password: Zeroizing<String>,
}

impl Credential {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
        }
    }

    /// Answers a login challenge: lowercase hex SHA-256 of
    /// `challenge || password`.
    pub fn respond(&self, challenge: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(challenge);
        hasher.update(self.password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// In-memory credentials, keyed by account. Nothing is written to disk.
#[derive(Default)]
pub struct CredentialStore {
    credentials: RwLock<HashMap<AccountIdentity, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account: &AccountIdentity) -> Option<Credential> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned()
    }

    /// Stores a credential, replacing any previous one for the account.
    pub fn insert(&self, account: AccountIdentity, credential: Credential) {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account, credential);
    }

    pub fn remove(&self, account: &AccountIdentity) -> Option<Credential> {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account)
    }

    pub fn contains(&self, account: &AccountIdentity) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(account)
    }
}
