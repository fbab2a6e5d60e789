//! Cluster Coordination Daemon Library
//!
//! This library crate holds the modules of the `clusterd` daemon, a set of peer
//! processes that create and tear down shared storage resources together while
//! keeping a replicated configuration store consistent.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`store`**: the replicated key/value store contract, an in-process backend
//!   one node hosts, and the HTTP client every other node uses.
//! - **`lock`**: a lease-backed mutex keyed by resource name, so that conflicting
//!   operations are serialized cluster-wide.
//! - **`transaction`**: the multi-node Stage / Commit / Store engine with rollback,
//!   its execution context, step registry and node dispatcher.
//! - **`peer`**: peer records and the bootstrap operations run when a node joins
//!   or leaves the cluster.
//! - **`volume`**: volume entries and the `vol-create` step set, the transaction
//!   every node registers at startup.
//! - **`config`** / **`error`**: daemon settings and the typed error enums.

pub mod config;
pub mod error;
pub mod lock;
pub mod peer;
pub mod store;
pub mod transaction;
pub mod volume;
