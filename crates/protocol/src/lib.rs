//! Shared types for the gridlink storage client transport.
//!
//! Everything in this crate is plain data: account identities, the pipeline
//! and pool configuration snapshot, the SSL negotiation policy table, the
//! control messages exchanged with the storage server, and the status types
//! the transfer engine reports upward. The async codecs that move these types
//! over a socket live in `gridlink-data-channel`.

pub mod account;
pub mod config;
pub mod control;
pub mod negotiation;
pub mod transfer;

pub use account::{AccountIdentity, AuthScheme};
pub use config::{ClientConfig, ConfigError, EncryptionAlgorithm, PipelineConfiguration, PoolSettings};
pub use control::ControlMessage;
pub use negotiation::{
    CapabilityDescriptor, NegotiationOutcome, ServerCapabilities, SslNegotiationPolicy,
};
pub use transfer::{
    FileOutcome, StreamOutcome, StreamResult, TransferOperation, TransferState, TransferStatus,
};

/// Version string sent in the startup message.
pub const CLIENT_VERSION: &str = concat!("gridlink/", env!("CARGO_PKG_VERSION"));
