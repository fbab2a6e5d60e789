//! Replicated Key/Value Store Interface
//!
//! Every durable piece of cluster state (resource locks, peer records, volume
//! entries) lives in a linearizable key/value store shared by all peers. This
//! module defines the contract the rest of the daemon relies on and ships two
//! backends.
//!
//! ## Contract
//! - **Put / Get / Delete**: plain key operations, values are JSON text.
//! - **Prefix scan**: returns every live entry under a prefix, ordered by key.
//! - **Leases**: `create_with_lease` is an atomic create-if-absent whose entry
//!   disappears when the lease is revoked or not kept alive within its TTL.
//!   This is the primitive the resource lock is built on.
//!
//! ## Submodules
//! - **`memory`**: in-process backend, hosted by one node of the cluster.
//! - **`client`**: HTTP client used by every other node to reach the hosted store.
//! - **`handlers`** / **`protocol`**: the HTTP surface of a hosted store.

pub mod client;
pub mod handlers;
pub mod memory;
pub mod protocol;


use crate::error::StoreResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Root of every key written by the daemon.
pub const GLOBAL_PREFIX: &str = "clusterd/";

/// Namespace reserved for resource locks, kept apart from domain data.
pub const LOCK_PREFIX: &str = "clusterd/locks/";

/// Identifier of a lease granted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub u64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A single entry returned by a prefix scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Shared handle to whichever backend the daemon was started with.
pub type SharedStore = Arc<dyn KvStore>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: String) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>>;

    /// Atomically creates `key` bound to a fresh lease of length `ttl`.
    ///
    /// Returns `None` when a live entry already exists under `key`. An entry
    /// whose lease has expired counts as absent.
    async fn create_with_lease(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> StoreResult<Option<LeaseId>>;

    /// Extends a lease by its TTL. Returns `false` if it already expired.
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<bool>;

    /// Revokes a lease and deletes the entries still bound to it.
    /// Revoking an unknown or expired lease is a no-op.
    async fn revoke(&self, lease: LeaseId) -> StoreResult<()>;
}
