//! Parallel object transfer for gridlink.
//!
//! A [`ParallelTransferCoordinator`] asks the server for a transfer grant,
//! splits the object into a [`TransferPlan`] of contiguous byte ranges, and
//! moves each range on its own pooled connection. Progress is published as
//! [`TransferStatus`](gridlink_protocol::TransferStatus) snapshots; the
//! attempt always ends in exactly one terminal state.

mod backend;
mod coordinator;
mod error;
mod integrity;
mod plan;
mod progress;
mod state;
mod validation;

pub use backend::{PooledBackend, TransferBackend, TransferGrant, TransferRequest};
pub use coordinator::{
    CancelOutcome, DEFAULT_ATTEMPT_RETENTION, ParallelTransferCoordinator, TransferHandle,
    TransferSummary,
};
pub use error::TransferError;
pub use integrity::{checksum_bytes, checksums_match, file_checksum};
pub use plan::{ByteRange, TransferPlan};
pub use progress::SpeedCalculator;
pub use state::{IllegalTransition, TransferAttempt};
pub use validation::validate_logical_path;
