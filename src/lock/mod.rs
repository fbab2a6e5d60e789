//! Distributed Resource Lock
//!
//! Serializes transactions that touch the same named resource across the whole
//! cluster. A lock is an entry under [`crate::store::LOCK_PREFIX`] created with
//! the store's atomic create-if-absent, bound to a lease.
//!
//! ## Lifecycle
//! 1. **Acquire**: try to create the entry; if someone else holds it, back off
//!    (with jitter) and retry until the timeout elapses.
//! 2. **Hold**: a sidecar task keeps the lease alive every third of its TTL.
//! 3. **Release**: stop the sidecar and revoke the lease. Releasing twice is a no-op.
//! 4. **Crash**: if the holder dies the sidecar dies with it, the lease expires
//!    and the next acquirer gets the key without manual intervention.

pub mod manager;

#[cfg(test)]
mod tests;

pub use manager::{LockHandle, LockManager};
