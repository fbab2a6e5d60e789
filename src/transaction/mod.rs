//! Distributed Transaction Engine
//!
//! Runs an operation across a set of nodes so that it either completes on all
//! of them or is compensated, while serializing operations that touch the same
//! named resource cluster-wide.
//!
//! ## Architecture Overview
//! 1. **Locking**: the orchestrator takes the resource lock for the transaction's key.
//! 2. **Stage / Commit / Store**: each phase runs its step on every target node
//!    concurrently; the next phase starts only after every node replied.
//! 3. **Rollback**: on the first failure the compensating step runs on the nodes
//!    that may carry effects; its own failures are logged, not reported.
//! 4. **Release**: the lock is released on every exit path.
//!
//! ## Submodules
//! - **`context`**: the key/value state and logger carried through a transaction.
//! - **`registry`**: maps step names to step functions, frozen at startup.
//! - **`dispatcher`**: runs a step on one node, locally or over RPC.
//! - **`orchestrator`**: the phase state machine.
//! - **`protocol`** / **`handlers`**: the step invocation RPC.

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;


pub use context::TxnCtx;
pub use dispatcher::{Dispatcher, HttpTransport, StepTransport};
pub use orchestrator::{Orchestrator, Txn, TxnBuilder, TxnSettings};
pub use registry::{StepRegistry, StepRegistryBuilder};
pub use types::{Phase, RollbackScope, TxnId, TxnState};
