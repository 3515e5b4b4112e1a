//! Keyed object pools.
//!
//! [`KeyedPool`] keeps a bounded sub-pool per key. Borrowing waits for a
//! free slot, reuses an idle object when one exists and otherwise asks the
//! [`PoolableFactory`] for a new one. A borrowed object is held through a
//! [`PooledObject`] guard and must be returned with
//! [`release`](PooledObject::release) or thrown away with
//! [`invalidate`](PooledObject::invalidate).
//!
//! [`SingleSlotPool`] is the capacity-1 variant for objects that can only be
//! created once per key.

mod error;
mod factory;
mod keyed;
mod single_slot;

pub use error::PoolError;
pub use factory::{BoxFuture, PoolableFactory};
pub use keyed::{KeyedPool, PoolKey, PoolStats, PooledObject};
pub use single_slot::SingleSlotPool;
