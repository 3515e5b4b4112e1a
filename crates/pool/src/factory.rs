use std::future::Future;
use std::pin::Pin;

use crate::error::PoolError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Creates, tears down and health-checks pooled objects for a key.
pub trait PoolableFactory<K, T>: Send + Sync {
    /// Builds a new object for `key`.
    fn make_object<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<T, PoolError>>;

    /// Tears an object down. Errors are logged by the pool and never reach
    /// the borrower.
    fn destroy_object<'a>(&'a self, key: &'a K, object: T) -> BoxFuture<'a, Result<(), PoolError>>;

    /// Returns `false` when the object must not be handed out again.
    fn validate_object<'a>(&'a self, key: &'a K, object: &'a mut T) -> BoxFuture<'a, bool>;
}
