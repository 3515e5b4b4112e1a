use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a transfer relative to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOperation {
    /// Local file to server object.
    Put,
    /// Server object to local file.
    Get,
}

/// Lifecycle of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    #[serde(rename = "enqueued")]
    Enqueued,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "error")]
    Error,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Cancelled | TransferState::Error
        )
    }
}

/// How a single stream worker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    Ok,
    IoError,
    Cancelled,
}

/// Report from one stream worker covering `[range_start, range_end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResult {
    pub range_start: u64,
    pub range_end: u64,
    pub bytes_transferred: u64,
    pub outcome: StreamOutcome,
}

impl StreamResult {
    pub fn range_len(&self) -> u64 {
        self.range_end - self.range_start
    }

    /// `true` when the stream finished and moved exactly its range.
    pub fn is_complete(&self) -> bool {
        self.outcome == StreamOutcome::Ok && self.bytes_transferred == self.range_len()
    }
}

/// Per-file result reported alongside the attempt state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOutcome {
    Pending,
    /// All bytes moved, no checksum comparison requested.
    Transferred,
    /// All bytes moved and the checksums matched.
    Verified,
    /// All bytes moved but the checksums differ.
    Unverified { expected: String, actual: String },
    Failed { reason: String },
    Cancelled,
}

/// Snapshot pushed to status listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    pub attempt_id: String,
    pub logical_path: String,
    pub bytes_so_far: u64,
    pub total_bytes: u64,
    pub bytes_per_second: f64,
    pub current_state: TransferState,
    pub per_file_outcome: FileOutcome,
    pub updated_at: DateTime<Utc>,
}

impl TransferStatus {
    /// Progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_so_far as f64 / self.total_bytes as f64 * 100.0
    }
}
