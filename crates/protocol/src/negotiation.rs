//! SSL negotiation policies and the capability exchange.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{EncryptionAlgorithm, PipelineConfiguration};

/// One side's stance on wrapping the session in SSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SslNegotiationPolicy {
    #[serde(rename = "CS_NEG_REQUIRE")]
    Require,
    #[serde(rename = "CS_NEG_DONT_CARE")]
    DontCare,
    #[default]
    #[serde(rename = "CS_NEG_REFUSE")]
    Refuse,
}

impl SslNegotiationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SslNegotiationPolicy::Require => "CS_NEG_REQUIRE",
            SslNegotiationPolicy::DontCare => "CS_NEG_DONT_CARE",
            SslNegotiationPolicy::Refuse => "CS_NEG_REFUSE",
        }
    }
}

impl fmt::Display for SslNegotiationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of crossing the client and server policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationOutcome {
    UseSsl,
    UseTcp,
    Failure,
}

impl NegotiationOutcome {
    /// Resolves the outcome from both policies.
    ///
    /// | client \ server | Require | DontCare | Refuse  |
    /// |-----------------|---------|----------|---------|
    /// | Require         | SSL     | SSL      | failure |
    /// | DontCare        | SSL     | SSL      | TCP     |
    /// | Refuse          | failure | TCP      | TCP     |
    pub fn resolve(client: SslNegotiationPolicy, server: SslNegotiationPolicy) -> Self {
        use SslNegotiationPolicy::*;
        match (client, server) {
            (Require, Require) | (Require, DontCare) => NegotiationOutcome::UseSsl,
            (Require, Refuse) | (Refuse, Require) => NegotiationOutcome::Failure,
            (DontCare, Require) | (DontCare, DontCare) => NegotiationOutcome::UseSsl,
            (DontCare, Refuse) | (Refuse, DontCare) | (Refuse, Refuse) => {
                NegotiationOutcome::UseTcp
            }
        }
    }
}

/// What the client offers in its `Negotiate` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub policy: SslNegotiationPolicy,
    pub algorithm: EncryptionAlgorithm,
    pub key_size: u32,
    pub salt_size: u32,
    pub hash_rounds: u32,
}

impl CapabilityDescriptor {
    pub fn from_config(config: &PipelineConfiguration) -> Self {
        Self {
            policy: config.ssl_policy,
            algorithm: config.encryption_algorithm.clone(),
            key_size: config.encryption_key_size,
            salt_size: config.encryption_salt_size,
            hash_rounds: config.encryption_hash_rounds,
        }
    }
}

/// The server's policy and, for SSL sessions, the encryption parameters it
/// chose. The server's parameters win over the client's offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub policy: SslNegotiationPolicy,
    pub algorithm: EncryptionAlgorithm,
    pub key_size: u32,
    pub salt_size: u32,
    pub hash_rounds: u32,
}

impl ServerCapabilities {
    /// Capabilities mirroring a pipeline configuration under `policy`.
    pub fn with_policy(policy: SslNegotiationPolicy, config: &PipelineConfiguration) -> Self {
        Self {
            policy,
            algorithm: config.encryption_algorithm.clone(),
            key_size: config.encryption_key_size,
            salt_size: config.encryption_salt_size,
            hash_rounds: config.encryption_hash_rounds,
        }
    }
}
