use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::warn;

use gridlink_protocol::PoolSettings;

use crate::error::PoolError;
use crate::factory::{BoxFuture, PoolableFactory};
use crate::keyed::{KeyedPool, PoolKey, PoolStats, PooledObject, lock};

/// Wraps a factory so each key is only ever built once.
struct OnceFactory<K, T> {
    inner: Arc<dyn PoolableFactory<K, T>>,
    established: Mutex<HashSet<K>>,
}

impl<K: PoolKey, T: Send + 'static> PoolableFactory<K, T> for OnceFactory<K, T> {
    fn make_object<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<T, PoolError>> {
        Box::pin(async move {
            if lock(&self.established).contains(key) {
                warn!(%key, "single session already consumed");
                return Err(PoolError::SessionLost(key.to_string()));
            }
            let object = self.inner.make_object(key).await?;
            lock(&self.established).insert(key.clone());
            Ok(object)
        })
    }

    fn destroy_object<'a>(&'a self, key: &'a K, object: T) -> BoxFuture<'a, Result<(), PoolError>> {
        self.inner.destroy_object(key, object)
    }

    fn validate_object<'a>(&'a self, key: &'a K, object: &'a mut T) -> BoxFuture<'a, bool> {
        self.inner.validate_object(key, object)
    }
}

/// Pool with exactly one object per key, created at most once.
///
/// For credentials that are consumed by a successful login: every borrower
/// for the key shares the one session in turn. Once that session has been
/// destroyed, further borrows fail with [`PoolError::SessionLost`] until
/// [`reset`](Self::reset) is called for the key.
pub struct SingleSlotPool<K, T> {
    pool: KeyedPool<K, T>,
    once: Arc<OnceFactory<K, T>>,
}

impl<K, T> Clone for SingleSlotPool<K, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            once: Arc::clone(&self.once),
        }
    }
}

impl<K: PoolKey, T: Send + 'static> SingleSlotPool<K, T> {
    /// Builds the pool. `max_per_account` in `settings` is forced to 1; the
    /// blocking and timeout settings are kept.
    pub fn new(factory: Arc<dyn PoolableFactory<K, T>>, settings: PoolSettings) -> Self {
        let once = Arc::new(OnceFactory {
            inner: factory,
            established: Mutex::new(HashSet::new()),
        });
        let settings = PoolSettings {
            max_per_account: 1,
            ..settings
        };
        let pool = KeyedPool::new(once.clone(), settings);
        Self { pool, once }
    }

    pub async fn borrow(&self, key: &K) -> Result<PooledObject<K, T>, PoolError> {
        self.pool.borrow(key).await
    }

    /// Whether a session has been created for `key` at some point.
    pub fn is_established(&self, key: &K) -> bool {
        lock(&self.once.established).contains(key)
    }

    /// Allows one new session for `key`, e.g. after a fresh credential was
    /// registered.
    pub fn reset(&self, key: &K) {
        lock(&self.once.established).remove(key);
    }

    pub fn stats(&self, key: &K) -> PoolStats {
        self.pool.stats(key)
    }

    pub async fn destroy(&self) {
        self.pool.destroy().await;
    }
}
