use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use uuid::Uuid;

use gridlink_connection::ConnectionManager;
use gridlink_protocol::{
    FileOutcome, PipelineConfiguration, StreamOutcome, StreamResult, TransferOperation,
    TransferState, TransferStatus,
};

use crate::backend::{PooledBackend, TransferBackend, TransferGrant, TransferRequest};
use crate::error::TransferError;
use crate::integrity::{checksums_match, file_checksum};
use crate::plan::{ByteRange, TransferPlan};
use crate::progress::StatusReporter;
use crate::state::TransferAttempt;
use crate::validation::validate_logical_path;

/// Result of [`ParallelTransferCoordinator::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The attempt was processing; its workers stop at their next buffer.
    Requested,
    /// The attempt has not started processing yet; nothing was done.
    NotProcessing,
    AlreadyTerminal,
    Unknown,
}

/// Completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub attempt_id: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub streams: Vec<StreamResult>,
    pub checksum: Option<String>,
    pub outcome: FileOutcome,
}

/// Caller's view of a submitted transfer.
pub struct TransferHandle {
    attempt_id: String,
    status: watch::Receiver<TransferStatus>,
    task: JoinHandle<Result<TransferSummary, TransferError>>,
}

impl TransferHandle {
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Latest-value status channel. Updated periodically and on every state
    /// change; the final snapshot carries the terminal state.
    pub fn status(&self) -> watch::Receiver<TransferStatus> {
        self.status.clone()
    }

    /// Waits for the attempt to reach a terminal state.
    pub async fn wait(self) -> Result<TransferSummary, TransferError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Stream(format!("transfer task failed: {e}"))),
        }
    }
}

struct AttemptEntry {
    attempt: Arc<Mutex<TransferAttempt>>,
    cancel: CancellationToken,
}

/// How long a terminal attempt stays queryable through
/// [`ParallelTransferCoordinator::state`] by default.
pub const DEFAULT_ATTEMPT_RETENTION: Duration = Duration::from_secs(600);

/// Runs put/get transfers as parallel range streams.
///
/// Each attempt runs in its own task. Stream workers are spawned per planned
/// range and share only the attempt's cancellation token and byte counter.
///
/// Records of terminal attempts are dropped on the next submission once they
/// are older than the retention window, so a long-lived coordinator does not
/// accumulate them. [`prune_finished`](Self::prune_finished) drops them all
/// at once.
#[derive(Clone)]
pub struct ParallelTransferCoordinator {
    backend: Arc<dyn TransferBackend>,
    config: Arc<PipelineConfiguration>,
    attempts: Arc<Mutex<HashMap<String, AttemptEntry>>>,
    retention: Duration,
    span: Span,
}

impl ParallelTransferCoordinator {
    pub fn new(backend: Arc<dyn TransferBackend>, config: PipelineConfiguration) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            retention: DEFAULT_ATTEMPT_RETENTION,
            span: Span::current(),
        }
    }

    /// Coordinator moving bytes over `manager`'s pooled connections.
    pub fn pooled(manager: Arc<ConnectionManager>) -> Self {
        let config = manager.pipeline().clone();
        Self::new(Arc::new(PooledBackend::new(manager)), config)
    }

    /// Runs every attempt inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Keeps terminal attempts queryable for `retention` after they finish.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    /// Validates the request and starts the attempt in the background.
    ///
    /// An invalid logical path is rejected here, before an attempt exists.
    pub fn submit_transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferHandle, TransferError> {
        validate_logical_path(&request.logical_path)?;

        let attempt_id = Uuid::new_v4().to_string();
        let attempt = Arc::new(Mutex::new(TransferAttempt::new(
            attempt_id.clone(),
            request.logical_path.clone(),
            request.operation,
        )));
        let cancel = CancellationToken::new();
        let expired = self.prune_older_than(self.retention);
        if expired > 0 {
            debug!(expired, "expired finished attempts");
        }
        lock(&self.attempts).insert(
            attempt_id.clone(),
            AttemptEntry {
                attempt: Arc::clone(&attempt),
                cancel: cancel.clone(),
            },
        );

        let (reporter, status) = StatusReporter::new(&attempt_id, &request.logical_path);
        let span = info_span!(
            parent: &self.span,
            "transfer",
            attempt = %attempt_id,
            path = %request.logical_path,
            op = ?request.operation,
        );
        let run = AttemptRun {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            request: Arc::new(request),
            attempt,
            cancel,
            reporter,
            progress: Arc::new(AtomicU64::new(0)),
        };
        let task = tokio::spawn(run.drive().instrument(span));

        Ok(TransferHandle {
            attempt_id,
            status,
            task,
        })
    }

    /// Requests cooperative cancellation of a processing attempt.
    pub fn cancel(&self, attempt_id: &str) -> CancelOutcome {
        let attempts = lock(&self.attempts);
        let Some(entry) = attempts.get(attempt_id) else {
            return CancelOutcome::Unknown;
        };

        let state = lock(&entry.attempt).state();
        match state {
            TransferState::Processing => {
                entry.cancel.cancel();
                info!(attempt = attempt_id, "cancellation requested");
                CancelOutcome::Requested
            }
            TransferState::Enqueued => CancelOutcome::NotProcessing,
            _ => CancelOutcome::AlreadyTerminal,
        }
    }

    /// Current state of an attempt this coordinator knows about.
    pub fn state(&self, attempt_id: &str) -> Option<TransferState> {
        lock(&self.attempts)
            .get(attempt_id)
            .map(|entry| lock(&entry.attempt).state())
    }

    /// Drops the records of terminal attempts. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        self.prune_older_than(Duration::ZERO)
    }

    fn prune_older_than(&self, age: Duration) -> usize {
        let mut attempts = lock(&self.attempts);
        let before = attempts.len();
        attempts.retain(|_, entry| match lock(&entry.attempt).finished_at() {
            Some(at) => at.elapsed() < age,
            None => true,
        });
        before - attempts.len()
    }
}

/// Everything one attempt's driver task owns.
struct AttemptRun {
    backend: Arc<dyn TransferBackend>,
    config: Arc<PipelineConfiguration>,
    request: Arc<TransferRequest>,
    attempt: Arc<Mutex<TransferAttempt>>,
    cancel: CancellationToken,
    reporter: StatusReporter,
    progress: Arc<AtomicU64>,
}

enum Joined {
    AllDone(Vec<StreamResult>),
    Failed {
        error: TransferError,
        stream: Option<StreamResult>,
    },
}

impl AttemptRun {
    async fn drive(mut self) -> Result<TransferSummary, TransferError> {
        let (grant, plan) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "transfer could not start");
                self.conclude(TransferState::Error, failed(&e));
                return Err(e);
            }
        };
        let grant = Arc::new(grant);

        info!(
            total_bytes = plan.total_bytes,
            streams = plan.stream_count(),
            "transfer processing"
        );
        self.enter(TransferState::Processing);

        match self.run_streams(&grant, &plan).await {
            Joined::Failed { error: e, stream } => {
                let range = stream.map(|s| ByteRange {
                    start: s.range_start,
                    end: s.range_end,
                });
                error!(error = %e, range = ?range, "stream failed, aborting transfer");
                self.cancel.cancel();
                self.abandon_in_background(&grant);
                self.conclude(TransferState::Error, failed(&e));
                Err(e)
            }
            Joined::AllDone(streams)
                if streams.iter().any(|s| s.outcome == StreamOutcome::Cancelled) =>
            {
                if let Err(e) = self.backend.finish(&self.request, &grant, false).await {
                    warn!(error = %e, "abandoning cancelled transfer failed");
                }
                let moved: u64 = streams.iter().map(|s| s.bytes_transferred).sum();
                info!(moved, "transfer cancelled");
                self.conclude(TransferState::Cancelled, FileOutcome::Cancelled);
                Err(TransferError::Cancelled)
            }
            Joined::AllDone(streams) => self.complete(&grant, &plan, streams).await,
        }
    }

    /// Obtains the grant and plans the ranges.
    async fn prepare(&mut self) -> Result<(TransferGrant, TransferPlan), TransferError> {
        let configured_max = self.config.max_parallel_streams.max(1);

        let local_size = match self.request.operation {
            TransferOperation::Put => {
                Some(tokio::fs::metadata(&self.request.local_path).await?.len())
            }
            TransferOperation::Get => None,
        };
        let requested = match local_size {
            Some(size) if size < self.config.parallel_threshold => 1,
            _ => configured_max,
        };

        let grant = self
            .backend
            .begin(&self.request, local_size, requested)
            .await?;
        if let Some(size) = local_size
            && grant.total_bytes != size
        {
            return Err(TransferError::Stream(format!(
                "server granted {} bytes for a {size}-byte file",
                grant.total_bytes
            )));
        }

        let plan = if grant.total_bytes < self.config.parallel_threshold {
            TransferPlan::single(grant.total_bytes)
        } else {
            TransferPlan::partition(grant.total_bytes, grant.max_streams, configured_max)
        };

        if self.request.operation == TransferOperation::Get {
            let file = tokio::fs::File::create(&self.request.local_path).await?;
            file.set_len(grant.total_bytes).await?;
        }

        lock(&self.attempt).set_total_bytes(plan.total_bytes);
        Ok((grant, plan))
    }

    /// Spawns one worker per range and collects their results.
    ///
    /// Returns on the first failure without waiting for the other workers;
    /// they are detached and stop at their next checkpoint once the caller
    /// cancels the token.
    async fn run_streams(&mut self, grant: &Arc<TransferGrant>, plan: &TransferPlan) -> Joined {
        let mut workers = JoinSet::new();
        for (index, range) in plan.ranges.iter().copied().enumerate() {
            let backend = Arc::clone(&self.backend);
            let request = Arc::clone(&self.request);
            let grant = Arc::clone(grant);
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&self.progress);
            let span = info_span!("stream", index, %range);

            workers.spawn(
                async move {
                    let result = backend
                        .transfer_range(&request, &grant, range, &cancel, &progress)
                        .await;
                    match &result {
                        Ok(r) => debug!(bytes = r.bytes_transferred, outcome = ?r.outcome, "stream finished"),
                        Err(e) => debug!(error = %e, "stream failed"),
                    }
                    (range, result)
                }
                .instrument(span),
            );
        }

        let mut ticker = tokio::time::interval(self.config.status_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut results = Vec::with_capacity(plan.stream_count());

        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((_, Ok(result))) => results.push(result),
                        Ok((range, Err(error))) => {
                            workers.detach_all();
                            return Joined::Failed {
                                error,
                                stream: Some(io_error_result(range)),
                            };
                        }
                        Err(e) => {
                            workers.detach_all();
                            return Joined::Failed {
                                error: TransferError::Stream(format!("stream worker aborted: {e}")),
                                stream: None,
                            };
                        }
                    }
                }
                _ = ticker.tick() => self.publish(),
            }
        }

        results.sort_by_key(|r| r.range_start);
        Joined::AllDone(results)
    }

    async fn complete(
        &mut self,
        grant: &TransferGrant,
        plan: &TransferPlan,
        streams: Vec<StreamResult>,
    ) -> Result<TransferSummary, TransferError> {
        let moved: u64 = streams.iter().map(|s| s.bytes_transferred).sum();
        if moved != plan.total_bytes || !streams.iter().all(StreamResult::is_complete) {
            let e = TransferError::Stream(format!(
                "streams moved {moved} of {} bytes",
                plan.total_bytes
            ));
            self.abandon_in_background(grant);
            self.conclude(TransferState::Error, failed(&e));
            return Err(e);
        }

        let checksum = match self.backend.finish(&self.request, grant, true).await {
            Ok(checksum) => checksum,
            Err(e) => {
                self.conclude(TransferState::Error, failed(&e));
                return Err(e);
            }
        };

        let (outcome, integrity) = self.verify(checksum.as_deref()).await;
        self.conclude(TransferState::Complete, outcome.clone());
        info!(bytes = moved, outcome = ?outcome, "transfer complete");

        if let Some(e) = integrity {
            return Err(e);
        }
        Ok(TransferSummary {
            attempt_id: lock(&self.attempt).attempt_id.clone(),
            total_bytes: plan.total_bytes,
            bytes_transferred: moved,
            streams,
            checksum,
            outcome,
        })
    }

    /// Compares the local file against the server checksum when enabled.
    async fn verify(&self, server: Option<&str>) -> (FileOutcome, Option<TransferError>) {
        if !self.config.verify_checksum {
            return (FileOutcome::Transferred, None);
        }
        let Some(expected) = server else {
            warn!("server returned no checksum, skipping verification");
            return (FileOutcome::Transferred, None);
        };

        let actual = match file_checksum(&self.request.local_path).await {
            Ok(actual) => actual,
            Err(e) => {
                warn!(error = %e, "local checksum failed");
                return (
                    FileOutcome::Unverified {
                        expected: expected.to_string(),
                        actual: String::new(),
                    },
                    Some(e.into()),
                );
            }
        };

        if checksums_match(expected, &actual) {
            (FileOutcome::Verified, None)
        } else {
            warn!(%expected, %actual, "checksum mismatch");
            (
                FileOutcome::Unverified {
                    expected: expected.to_string(),
                    actual: actual.clone(),
                },
                Some(TransferError::Integrity {
                    expected: expected.to_string(),
                    actual,
                }),
            )
        }
    }

    /// Tells the server to drop the transfer without blocking the caller.
    fn abandon_in_background(&self, grant: &TransferGrant) {
        let backend = Arc::clone(&self.backend);
        let request = Arc::clone(&self.request);
        let grant = grant.clone();
        tokio::spawn(
            async move {
                if let Err(e) = backend.finish(&request, &grant, false).await {
                    debug!(error = %e, "abandoning failed transfer failed");
                }
            }
            .instrument(Span::current()),
        );
    }

    fn enter(&mut self, state: TransferState) {
        if let Err(e) = lock(&self.attempt).transition(state) {
            warn!(error = %e, "state change rejected");
        }
        self.publish();
    }

    fn conclude(&mut self, state: TransferState, outcome: FileOutcome) {
        if let Err(e) = lock(&self.attempt).finish(state, outcome) {
            warn!(error = %e, "state change rejected");
        }
        self.publish();
    }

    fn publish(&mut self) {
        let (state, total, outcome) = {
            let attempt = lock(&self.attempt);
            (attempt.state(), attempt.total_bytes(), attempt.outcome().clone())
        };
        let bytes = self.progress.load(Ordering::Relaxed);
        self.reporter.publish(state, bytes, total, &outcome);
    }
}

fn io_error_result(range: ByteRange) -> StreamResult {
    StreamResult {
        range_start: range.start,
        range_end: range.end,
        bytes_transferred: 0,
        outcome: StreamOutcome::IoError,
    }
}

fn failed(err: &TransferError) -> FileOutcome {
    FileOutcome::Failed {
        reason: err.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
