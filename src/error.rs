//! Error types shared by the transaction engine, the lock and the store client.
//!
//! `TxnError` is what an adapter sees when a transaction fails. Callers that only
//! need to pick a status code should use [`TxnError::kind`] instead of matching
//! on the structure.

use crate::peer::types::NodeId;
use crate::transaction::types::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for transaction operations.
pub type TxnResult<T> = std::result::Result<T, TxnError>;

/// Result type for volume operations.
pub type VolumeResult<T> = std::result::Result<T, VolumeError>;

/// Errors raised by a [`crate::store::KvStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or answered with a failure status.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("store codec error: {0}")]
    Codec(String),

    /// The requested entry does not exist.
    #[error("key not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Errors raised by the resource lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The key stayed held by someone else until the timeout elapsed.
    #[error("timed out after {waited_ms}ms waiting for lock {key:?}")]
    Timeout { key: String, waited_ms: u64 },

    /// The backing store failed while acquiring or releasing.
    #[error("lock store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification of a [`TxnError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    LockContention,
    Step,
    Transport,
    Serialization,
    Deserialization,
    Rollback,
    Registry,
    KeyNotFound,
    InvalidTxn,
    Store,
    Internal,
}

/// How a single node failed a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The step ran and reported failure.
    Step,
    /// The node's outcome is unknown: unreachable, timed out or reset.
    Transport,
}

/// One node's failure during one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeId,
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
}

impl NodeFailure {
    /// Failures of compensating steps classify as `Rollback` regardless of
    /// how the node failed.
    pub fn error_kind(&self) -> ErrorKind {
        match (self.phase, self.kind) {
            (Phase::Rollback, _) => ErrorKind::Rollback,
            (_, FailureKind::Step) => ErrorKind::Step,
            (_, FailureKind::Transport) => ErrorKind::Transport,
        }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Step => "step failed",
            FailureKind::Transport => "unreachable",
        };
        write!(
            f,
            "{} on node {} during {}: {}",
            kind, self.node, self.phase, self.message
        )
    }
}

/// Everything known about a failed phase.
///
/// `primary` is the first failure that arrived; `others` keeps every other
/// failing node of the same phase. Rollback failures are recorded for
/// diagnostics only and never replace `primary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub primary: NodeFailure,
    pub others: Vec<NodeFailure>,
    pub rollback_failures: Vec<NodeFailure>,
}

impl PhaseFailure {
    pub fn new(primary: NodeFailure) -> Self {
        Self {
            primary,
            others: Vec::new(),
            rollback_failures: Vec::new(),
        }
    }

    /// All failing nodes of the phase, primary first.
    pub fn failures(&self) -> impl Iterator<Item = &NodeFailure> {
        std::iter::once(&self.primary).chain(self.others.iter())
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.others.is_empty() {
            write!(f, " (and {} more node failure(s))", self.others.len())?;
        }
        Ok(())
    }
}

/// Errors returned by transaction construction, execution and context access.
#[derive(Debug, Error)]
pub enum TxnError {
    /// The resource lock was not acquired; no phase ran.
    #[error("lock contention: {0}")]
    LockContention(String),

    /// A step explicitly reported failure on some node.
    #[error("{0}")]
    Step(Box<PhaseFailure>),

    /// A target node was unreachable or did not reply in time.
    #[error("{0}")]
    Transport(Box<PhaseFailure>),

    /// A context value could not be encoded.
    #[error("failed to serialize context value {key:?}: {message}")]
    Serialization { key: String, message: String },

    /// A context value could not be decoded into the requested type.
    #[error("failed to deserialize context value {key:?}: {message}")]
    Deserialization { key: String, message: String },

    /// The context has no value under the key.
    #[error("key not found in transaction context: {0}")]
    KeyNotFound(String),

    /// A step name was unknown or registered twice.
    #[error("step registry error: {0}")]
    Registry(String),

    /// The transaction description is unusable, or it was already executed.
    #[error("invalid transaction: {0}")]
    InvalidTxn(String),

    /// The replicated store failed outside of a phase.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The execution task died before producing an outcome.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TxnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxnError::LockContention(_) => ErrorKind::LockContention,
            TxnError::Step(_) => ErrorKind::Step,
            TxnError::Transport(_) => ErrorKind::Transport,
            TxnError::Serialization { .. } => ErrorKind::Serialization,
            TxnError::Deserialization { .. } => ErrorKind::Deserialization,
            TxnError::KeyNotFound(_) => ErrorKind::KeyNotFound,
            TxnError::Registry(_) => ErrorKind::Registry,
            TxnError::InvalidTxn(_) => ErrorKind::InvalidTxn,
            TxnError::Store(_) => ErrorKind::Store,
            TxnError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The phase failure details, for `Step` and `Transport` errors.
    pub fn phase_failure(&self) -> Option<&PhaseFailure> {
        match self {
            TxnError::Step(failure) | TxnError::Transport(failure) => Some(failure),
            _ => None,
        }
    }

    pub(crate) fn from_phase_failure(failure: PhaseFailure) -> Self {
        match failure.primary.kind {
            FailureKind::Step => TxnError::Step(Box::new(failure)),
            FailureKind::Transport => TxnError::Transport(Box::new(failure)),
        }
    }
}

impl From<LockError> for TxnError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Timeout { .. } => TxnError::LockContention(e.to_string()),
            LockError::Store(store) => TxnError::Store(store),
        }
    }
}

/// Errors returned by the volume create flow before or while it runs a transaction.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("volume name is empty")]
    EmptyName,

    #[error("brick list is empty")]
    EmptyBrickList,

    #[error("invalid brick {0:?}, expected <host>:<absolute path>")]
    InvalidBrick(String),

    #[error("volume {0} already exists")]
    Exists(String),

    /// A brick host did not match any known peer.
    #[error("no peer found for brick host {0}")]
    UnknownHost(String),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
