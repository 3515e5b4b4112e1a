use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;

use gridlink_protocol::{FileOutcome, TransferState, TransferStatus};

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

struct SpeedInner {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

/// Transfer speed over a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

impl SpeedCalculator {
    /// `window_size` defaults to 5 s, `max_samples` to 100.
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: VecDeque::new(),
                max_samples: max_samples.unwrap_or(100).max(2),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` moved since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, timestamp: Instant) {
        let mut s = self.lock();
        s.samples.push_back(SpeedSample { bytes, timestamp });

        let window = s.window_size;
        while s
            .samples
            .front()
            .is_some_and(|first| timestamp.duration_since(first.timestamp) > window)
        {
            s.samples.pop_front();
        }
        while s.samples.len() > s.max_samples {
            s.samples.pop_front();
        }
    }

    /// Average bytes per second inside the window; 0 with fewer than two
    /// samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.front(), s.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample's bytes were moved before the window opened.
        let bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`, `None` while the speed is 0.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        self.lock().samples.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes [`TransferStatus`] snapshots for one attempt.
pub(crate) struct StatusReporter {
    tx: watch::Sender<TransferStatus>,
    speed: SpeedCalculator,
    last_bytes: u64,
}

impl StatusReporter {
    pub(crate) fn new(
        attempt_id: &str,
        logical_path: &str,
    ) -> (Self, watch::Receiver<TransferStatus>) {
        let initial = TransferStatus {
            attempt_id: attempt_id.to_string(),
            logical_path: logical_path.to_string(),
            bytes_so_far: 0,
            total_bytes: 0,
            bytes_per_second: 0.0,
            current_state: TransferState::Enqueued,
            per_file_outcome: FileOutcome::Pending,
            updated_at: Utc::now(),
        };
        let (tx, rx) = watch::channel(initial);
        let reporter = Self {
            tx,
            speed: SpeedCalculator::new(None, None),
            last_bytes: 0,
        };
        (reporter, rx)
    }

    /// Publishes a snapshot. Receivers that went away are ignored.
    pub(crate) fn publish(
        &mut self,
        state: TransferState,
        bytes_so_far: u64,
        total_bytes: u64,
        outcome: &FileOutcome,
    ) {
        self.speed
            .add_sample(bytes_so_far.saturating_sub(self.last_bytes));
        self.last_bytes = bytes_so_far;
        let bytes_per_second = self.speed.bytes_per_second();

        self.tx.send_modify(|status| {
            status.bytes_so_far = bytes_so_far;
            status.total_bytes = total_bytes;
            status.bytes_per_second = bytes_per_second;
            status.current_state = state;
            status.per_file_outcome = outcome.clone();
            status.updated_at = Utc::now();
        });
    }
}
