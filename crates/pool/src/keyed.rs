use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use gridlink_protocol::PoolSettings;

use crate::error::PoolError;
use crate::factory::PoolableFactory;

/// Bounds every pool key must satisfy.
pub trait PoolKey: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

impl<K> PoolKey for K where K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static {}

/// Occupancy of one key's sub-pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    /// Borrowed objects plus borrows still being set up.
    pub active: usize,
    pub max_size: usize,
}

struct IdleObject<T> {
    id: u64,
    object: T,
}

struct SubPool<T> {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleObject<T>>>,
}

struct Shared<K, T> {
    factory: Arc<dyn PoolableFactory<K, T>>,
    settings: PoolSettings,
    max_size: usize,
    closed: AtomicBool,
    next_id: AtomicU64,
    sub_pools: Mutex<HashMap<K, Arc<SubPool<T>>>>,
}

impl<K: PoolKey, T: Send + 'static> Shared<K, T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn destroy_quietly(&self, key: &K, id: u64, object: T) {
        match self.factory.destroy_object(key, object).await {
            Ok(()) => debug!(%key, id, "pooled object destroyed"),
            Err(e) => warn!(%key, id, error = %e, "failed to destroy pooled object"),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A pool holding up to `max_per_account` objects per key.
pub struct KeyedPool<K, T> {
    shared: Arc<Shared<K, T>>,
}

impl<K, T> Clone for KeyedPool<K, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: PoolKey, T: Send + 'static> KeyedPool<K, T> {
    pub fn new(factory: Arc<dyn PoolableFactory<K, T>>, settings: PoolSettings) -> Self {
        let max_size = settings.max_per_account.max(1);
        Self {
            shared: Arc::new(Shared {
                factory,
                settings,
                max_size,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                sub_pools: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.shared.settings
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Borrows an object for `key`.
    ///
    /// Waits while the key's sub-pool is exhausted, unless
    /// `block_when_exhausted` is off. Borrowing twice for the same key from
    /// one task on a capacity-1 pool never completes.
    pub async fn borrow(&self, key: &K) -> Result<PooledObject<K, T>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let sub = self.sub_pool(key);
        let permit = self.acquire_permit(key, Arc::clone(&sub.permits)).await?;
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        loop {
            let candidate = lock(&sub.idle).pop();
            let Some(IdleObject { id, mut object }) = candidate else {
                break;
            };

            if self.shared.settings.test_on_borrow
                && !self.shared.factory.validate_object(key, &mut object).await
            {
                debug!(%key, id, "idle object failed validation");
                self.shared.destroy_quietly(key, id, object).await;
                continue;
            }

            debug!(%key, id, "reusing idle object");
            return Ok(PooledObject::new(
                Arc::clone(&self.shared),
                sub,
                key.clone(),
                id,
                object,
                permit,
            ));
        }

        // The permit is dropped with the error, freeing the slot.
        let object = self.shared.factory.make_object(key).await?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(%key, id, "created pooled object");

        Ok(PooledObject::new(
            Arc::clone(&self.shared),
            sub,
            key.clone(),
            id,
            object,
            permit,
        ))
    }

    /// Closes the pool and destroys every idle object.
    ///
    /// Teardown errors are logged and swallowed. Objects still borrowed are
    /// destroyed when they come back. Pending borrows fail with
    /// [`PoolError::Closed`].
    pub async fn destroy(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let pools: Vec<(K, Arc<SubPool<T>>)> = lock(&self.shared.sub_pools)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut destroyed = 0usize;
        for (key, sub) in pools {
            sub.permits.close();
            let idle = std::mem::take(&mut *lock(&sub.idle));
            for IdleObject { id, object } in idle {
                self.shared.destroy_quietly(&key, id, object).await;
                destroyed += 1;
            }
        }

        info!(destroyed, "pool destroyed");
    }

    pub fn stats(&self, key: &K) -> PoolStats {
        let max_size = self.shared.max_size;
        let sub = lock(&self.shared.sub_pools).get(key).cloned();
        match sub {
            Some(sub) => PoolStats {
                idle: lock(&sub.idle).len(),
                active: max_size - sub.permits.available_permits().min(max_size),
                max_size,
            },
            None => PoolStats {
                idle: 0,
                active: 0,
                max_size,
            },
        }
    }

    fn sub_pool(&self, key: &K) -> Arc<SubPool<T>> {
        let mut pools = lock(&self.shared.sub_pools);
        let sub = pools.entry(key.clone()).or_insert_with(|| {
            Arc::new(SubPool {
                permits: Arc::new(Semaphore::new(self.shared.max_size)),
                idle: Mutex::new(Vec::new()),
            })
        });
        Arc::clone(sub)
    }

    async fn acquire_permit(
        &self,
        key: &K,
        permits: Arc<Semaphore>,
    ) -> Result<OwnedSemaphorePermit, PoolError> {
        let settings = &self.shared.settings;

        if !settings.block_when_exhausted {
            return permits.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::Exhausted(key.to_string()),
                TryAcquireError::Closed => PoolError::Closed,
            });
        }

        let acquire = permits.acquire_owned();
        match settings.borrow_timeout() {
            Some(limit) => tokio::time::timeout(limit, acquire)
                .await
                .map_err(|_| PoolError::Timeout(limit))?
                .map_err(|_| PoolError::Closed),
            None => acquire.await.map_err(|_| PoolError::Closed),
        }
    }
}

/// Exclusive handle on a borrowed object.
///
/// Return it with [`release`](Self::release) or discard it with
/// [`invalidate`](Self::invalidate). Dropping the guard frees the slot but
/// drops the object without the factory's teardown.
pub struct PooledObject<K: PoolKey, T: Send + 'static> {
    shared: Arc<Shared<K, T>>,
    sub: Arc<SubPool<T>>,
    key: K,
    id: u64,
    object: Option<T>,
    _permit: OwnedSemaphorePermit,
}

impl<K: PoolKey, T: Send + 'static> PooledObject<K, T> {
    fn new(
        shared: Arc<Shared<K, T>>,
        sub: Arc<SubPool<T>>,
        key: K,
        id: u64,
        object: T,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            sub,
            key,
            id,
            object: Some(object),
            _permit: permit,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Pool-unique identifier of the underlying object.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the object to the pool. It is validated first and destroyed
    /// instead if validation fails or the pool has been closed.
    pub async fn release(mut self) {
        let Some(mut object) = self.object.take() else {
            return;
        };

        if !self.shared.is_closed()
            && !self.shared.factory.validate_object(&self.key, &mut object).await
        {
            debug!(key = %self.key, id = self.id, "object failed validation on release");
            self.shared.destroy_quietly(&self.key, self.id, object).await;
            return;
        }

        let rejected = {
            let mut idle = lock(&self.sub.idle);
            if self.shared.is_closed() {
                Some(object)
            } else {
                idle.push(IdleObject {
                    id: self.id,
                    object,
                });
                None
            }
        };

        match rejected {
            Some(object) => self.shared.destroy_quietly(&self.key, self.id, object).await,
            None => debug!(key = %self.key, id = self.id, "object returned to pool"),
        }
    }

    /// Destroys the object. It is never handed out again.
    pub async fn invalidate(mut self) {
        if let Some(object) = self.object.take() {
            debug!(key = %self.key, id = self.id, "invalidating pooled object");
            self.shared.destroy_quietly(&self.key, self.id, object).await;
        }
    }
}

// `object` is only taken by `release`, `invalidate` and `drop`, which all
// consume the guard, so no live guard can observe `None`.
impl<K: PoolKey, T: Send + 'static> Deref for PooledObject<K, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object
            .as_ref()
            .expect("pooled object is present until release")
    }
}

impl<K: PoolKey, T: Send + 'static> DerefMut for PooledObject<K, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object
            .as_mut()
            .expect("pooled object is present until release")
    }
}

impl<K: PoolKey, T: Send + 'static> Drop for PooledObject<K, T> {
    fn drop(&mut self) {
        if self.object.take().is_some() {
            debug!(key = %self.key, id = self.id, "pooled object dropped without release");
        }
    }
}

impl<K: PoolKey, T: Send + 'static> fmt::Debug for PooledObject<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("key", &self.key.to_string())
            .field("id", &self.id)
            .finish()
    }
}
