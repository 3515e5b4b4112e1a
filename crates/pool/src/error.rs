use std::time::Duration;

/// Errors returned by pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No free slot and the pool is configured not to wait.
    #[error("pool exhausted for {0}")]
    Exhausted(String),

    #[error("timed out after {0:?} waiting for a pooled object")]
    Timeout(Duration),

    #[error("pool is closed")]
    Closed,

    /// The only object for this key is gone and cannot be recreated.
    #[error("session lost for {0}; it cannot be re-established")]
    SessionLost(String),

    /// The factory failed to create or tear down an object.
    #[error("factory error: {0}")]
    Factory(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PoolError {
    pub fn factory(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        PoolError::Factory(Box::new(err))
    }
}
