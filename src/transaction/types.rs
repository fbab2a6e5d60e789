use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of one transaction instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TxnId(pub Uuid);

impl TxnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Non-destructive validation, safe to repeat.
    Stage,
    /// Locally recoverable side effects.
    Commit,
    /// The authoritative write to the replicated store.
    Store,
    /// Compensation after a failed phase.
    Rollback,
}

impl Phase {
    /// Phases run on every target node, in order, on the success path.
    pub const FORWARD: [Phase; 3] = [Phase::Stage, Phase::Commit, Phase::Store];

    /// Phases whose steps may leave effects that need compensating.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Phase::Commit | Phase::Store)
    }

    pub fn running_state(&self) -> TxnState {
        match self {
            Phase::Stage => TxnState::Staging,
            Phase::Commit => TxnState::Committing,
            Phase::Store => TxnState::Storing,
            Phase::Rollback => TxnState::RollingBack,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Stage => "Stage",
            Phase::Commit => "Commit",
            Phase::Store => "Store",
            Phase::Rollback => "Rollback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxnState {
    Created,
    Locking,
    Staging,
    Committing,
    Storing,
    RollingBack,
    Succeeded,
    Failed,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Succeeded | TxnState::Failed)
    }
}

/// Which nodes receive the rollback step after a failed phase.
///
/// Both scopes include nodes that failed Commit or Store, since their outcome
/// may be partial. They differ on nodes that only got through Stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RollbackScope {
    /// Every node that completed at least one phase.
    #[default]
    Completed,
    /// Only nodes that took part in Commit or Store.
    Mutating,
}
