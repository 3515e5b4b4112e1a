use std::time::Instant;

use gridlink_protocol::{FileOutcome, TransferOperation, TransferState};

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transfer state change {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: TransferState,
    pub to: TransferState,
}

/// Bookkeeping for one attempt: `Enqueued -> Processing -> {Complete | Cancelled | Error}`.
///
/// `Error` may also be entered directly from `Enqueued` when the attempt
/// fails before any stream starts.
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub attempt_id: String,
    pub logical_path: String,
    pub operation: TransferOperation,
    state: TransferState,
    total_bytes: u64,
    outcome: FileOutcome,
    finished_at: Option<Instant>,
}

impl TransferAttempt {
    pub fn new(
        attempt_id: impl Into<String>,
        logical_path: impl Into<String>,
        operation: TransferOperation,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            logical_path: logical_path.into(),
            operation,
            state: TransferState::Enqueued,
            total_bytes: 0,
            outcome: FileOutcome::Pending,
            finished_at: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn outcome(&self) -> &FileOutcome {
        &self.outcome
    }

    /// When the attempt entered its terminal state.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    pub fn set_total_bytes(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    pub fn can_transition(&self, to: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self.state, to),
            (Enqueued, Processing)
                | (Enqueued, Error)
                | (Processing, Complete)
                | (Processing, Cancelled)
                | (Processing, Error)
        )
    }

    pub fn transition(&mut self, to: TransferState) -> Result<(), IllegalTransition> {
        if !self.can_transition(to) {
            return Err(IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Moves to a terminal state and records the per-file outcome with it.
    pub fn finish(
        &mut self,
        to: TransferState,
        outcome: FileOutcome,
    ) -> Result<(), IllegalTransition> {
        self.transition(to)?;
        self.outcome = outcome;
        Ok(())
    }
}
