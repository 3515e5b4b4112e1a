use serde::{Deserialize, Serialize};

use crate::negotiation::{CapabilityDescriptor, NegotiationOutcome, ServerCapabilities};
use crate::transfer::TransferOperation;

/// Error codes carried by [`ControlMessage::Error`].
pub mod error_code {
    pub const BAD_REQUEST: i32 = 400;
    pub const AUTH_FAILED: i32 = 401;
    pub const NOT_FOUND: i32 = 404;
    pub const CONFLICT: i32 = 409;
    pub const INTERNAL: i32 = 500;
}

/// Every message exchanged on the control channel.
///
/// Serialized as `{"type": "...", "payload": {...}}`; unit variants omit the
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ControlMessage {
    // Session open
    Startup {
        user_name: String,
        zone: String,
        client_version: String,
        client_host: String,
        request_negotiation: bool,
    },
    Negotiate(CapabilityDescriptor),
    ServerNegotiation(ServerCapabilities),
    NegotiationResult {
        outcome: NegotiationOutcome,
    },
    /// Key the client derived, sent only after the stream has been secured.
    SharedSecret {
        #[serde(with = "base64_bytes")]
        key: Vec<u8>,
    },
    AuthChallenge {
        #[serde(with = "base64_bytes")]
        challenge: Vec<u8>,
    },
    AuthResponse {
        user_name: String,
        zone: String,
        response: String,
    },

    // Liveness
    Ping,
    Pong,

    // Transfer
    BeginTransfer {
        logical_path: String,
        operation: TransferOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        requested_streams: u32,
    },
    TransferGrant {
        token: String,
        total_bytes: u64,
        max_streams: u32,
    },
    StreamRange {
        token: String,
        offset: u64,
        length: u64,
    },
    RangeAck {
        bytes: u64,
    },
    EndTransfer {
        token: String,
        commit: bool,
    },
    TransferCommitted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },

    Disconnect,
    Ok,
    Error {
        code: i32,
        message: String,
    },
}

impl ControlMessage {
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        ControlMessage::Error {
            code,
            message: message.into(),
        }
    }

    /// Short variant name for logs. Never includes payload contents.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Startup { .. } => "startup",
            ControlMessage::Negotiate(_) => "negotiate",
            ControlMessage::ServerNegotiation(_) => "server_negotiation",
            ControlMessage::NegotiationResult { .. } => "negotiation_result",
            ControlMessage::SharedSecret { .. } => "shared_secret",
            ControlMessage::AuthChallenge { .. } => "auth_challenge",
            ControlMessage::AuthResponse { .. } => "auth_response",
            ControlMessage::Ping => "ping",
            ControlMessage::Pong => "pong",
            ControlMessage::BeginTransfer { .. } => "begin_transfer",
            ControlMessage::TransferGrant { .. } => "transfer_grant",
            ControlMessage::StreamRange { .. } => "stream_range",
            ControlMessage::RangeAck { .. } => "range_ack",
            ControlMessage::EndTransfer { .. } => "end_transfer",
            ControlMessage::TransferCommitted { .. } => "transfer_committed",
            ControlMessage::Disconnect => "disconnect",
            ControlMessage::Ok => "ok",
            ControlMessage::Error { .. } => "error",
        }
    }
}

/// Encodes byte fields as standard base64 strings.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
