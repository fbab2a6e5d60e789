//! Transaction Orchestrator
//!
//! Drives one transaction through `Locking → Staging → Committing → Storing`,
//! fanning each phase out to every target node and waiting on a barrier before
//! the next phase starts. A failed phase switches to `RollingBack`, which runs
//! the compensating step on the nodes that may carry effects.
//!
//! ## Guarantees
//! - The resource lock is released exactly once on every exit path.
//! - Execution runs on its own task: dropping the future returned by
//!   [`Txn::run`] does not cancel a transaction half way.
//! - The reported error is always the first phase failure; rollback failures
//!   are logged and attached, never promoted.

use super::context::TxnCtx;
use super::dispatcher::{Dispatcher, InvokeError};
use super::protocol::CtxFragment;
use super::types::{Phase, RollbackScope, TxnId, TxnState};
use crate::error::{FailureKind, NodeFailure, PhaseFailure, TxnError, TxnResult};
use crate::lock::{LockHandle, LockManager};
use crate::peer::types::NodeId;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct TxnSettings {
    pub lock_timeout: Duration,
    /// How long a failed phase still waits for the replies of slower nodes.
    pub grace_period: Duration,
    pub rollback_scope: RollbackScope,
}

impl Default for TxnSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(2),
            rollback_scope: RollbackScope::default(),
        }
    }
}

/// Description of a transaction before it is validated.
#[derive(Debug, Clone, Default)]
pub struct TxnBuilder {
    pub nodes: Vec<NodeId>,
    pub lock_key: String,
    pub stage: String,
    pub commit: String,
    pub store: String,
    pub rollback: String,
    /// Request id for log correlation; a fresh one is generated when absent.
    pub reqid: Option<String>,
    pub log_fields: BTreeMap<String, String>,
}

impl TxnBuilder {
    /// Builder using the `<prefix>.Stage` .. `<prefix>.Rollback` step names.
    pub fn with_step_set(lock_key: impl Into<String>, nodes: Vec<NodeId>, prefix: &str) -> Self {
        Self {
            nodes,
            lock_key: lock_key.into(),
            stage: format!("{}.{}", prefix, Phase::Stage),
            commit: format!("{}.{}", prefix, Phase::Commit),
            store: format!("{}.{}", prefix, Phase::Store),
            rollback: format!("{}.{}", prefix, Phase::Rollback),
            ..Default::default()
        }
    }

    pub fn reqid(mut self, reqid: impl Into<String>) -> Self {
        self.reqid = Some(reqid.into());
        self
    }

    pub fn log_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.log_fields.insert(key.into(), value.into());
        self
    }
}

/// Validated, immutable part of a transaction.
#[derive(Debug)]
struct TxnPlan {
    nodes: Vec<NodeId>,
    lock_key: String,
    stage: String,
    commit: String,
    store: String,
    rollback: String,
}

impl TxnPlan {
    fn step(&self, phase: Phase) -> &str {
        match phase {
            Phase::Stage => &self.stage,
            Phase::Commit => &self.commit,
            Phase::Store => &self.store,
            Phase::Rollback => &self.rollback,
        }
    }
}

pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
    locks: Arc<LockManager>,
    settings: TxnSettings,
}

impl Orchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        locks: Arc<LockManager>,
        settings: TxnSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            locks,
            settings,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn local_id(&self) -> NodeId {
        self.dispatcher.local_id()
    }

    /// Validates `builder` and prepares a transaction with a fresh context.
    ///
    /// Fails with `InvalidTxn` for an empty node set and with `Registry` when
    /// a step name is unknown. Nothing is locked at this point.
    pub fn new_txn(self: &Arc<Self>, builder: TxnBuilder) -> TxnResult<Txn> {
        let mut seen = HashSet::new();
        let nodes: Vec<NodeId> = builder
            .nodes
            .into_iter()
            .filter(|node| seen.insert(*node))
            .collect();

        if nodes.is_empty() {
            return Err(TxnError::InvalidTxn("no target nodes".to_string()));
        }
        if builder.lock_key.is_empty() {
            return Err(TxnError::InvalidTxn("empty lock key".to_string()));
        }

        let registry = self.dispatcher.registry();
        for step in [
            &builder.stage,
            &builder.commit,
            &builder.store,
            &builder.rollback,
        ] {
            if !registry.contains(step) {
                return Err(TxnError::Registry(format!("unknown step: {}", step)));
            }
        }

        let reqid = builder
            .reqid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ctx = TxnCtx::with_log_fields(
            reqid,
            builder.log_fields,
            self.dispatcher.store().clone(),
        );

        let (state, _) = watch::channel(TxnState::Created);

        Ok(Txn {
            ctx,
            orchestrator: self.clone(),
            plan: Arc::new(TxnPlan {
                nodes,
                lock_key: builder.lock_key,
                stage: builder.stage,
                commit: builder.commit,
                store: builder.store,
                rollback: builder.rollback,
            }),
            state: Arc::new(state),
            lock: Arc::new(Mutex::new(None)),
            started: false,
        })
    }
}

/// One transaction instance. Runs at most once.
pub struct Txn {
    /// Context shared with every step; read results from it after `run`.
    pub ctx: TxnCtx,
    orchestrator: Arc<Orchestrator>,
    plan: Arc<TxnPlan>,
    state: Arc<watch::Sender<TxnState>>,
    lock: Arc<Mutex<Option<LockHandle>>>,
    started: bool,
}

impl Txn {
    pub fn id(&self) -> TxnId {
        self.ctx.txn_id()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.plan.nodes
    }

    pub fn lock_key(&self) -> &str {
        &self.plan.lock_key
    }

    pub fn state(&self) -> TxnState {
        *self.state.borrow()
    }

    /// Observes state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<TxnState> {
        self.state.subscribe()
    }

    /// Executes the transaction to a terminal state.
    pub async fn run(&mut self) -> TxnResult<()> {
        if self.started {
            return Err(TxnError::InvalidTxn(format!(
                "transaction {} was already run",
                self.id()
            )));
        }
        self.started = true;

        let execution = Execution {
            orchestrator: self.orchestrator.clone(),
            plan: self.plan.clone(),
            ctx: self.ctx.clone(),
            state: self.state.clone(),
            lock: self.lock.clone(),
        };
        let span = self.ctx.logger().clone();

        tokio::spawn(execution.execute().instrument(span))
            .await
            .map_err(|e| {
                tracing::error!("Transaction {} task failed: {}", self.id(), e);
                TxnError::Internal(e.to_string())
            })?
    }

    /// Releases anything the transaction still holds. Safe to call any number
    /// of times, whether or not `run` was called or succeeded.
    pub async fn cleanup(&self) {
        let handle = self.lock.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = self.orchestrator.locks.release(&handle).await
        {
            tracing::warn!("Failed to release lock {} during cleanup: {}", handle.key(), e);
        }
    }
}

/// Replies gathered for one phase.
struct PhaseOutcome {
    succeeded: Vec<(NodeId, CtxFragment)>,
    failures: Vec<NodeFailure>,
}

struct Execution {
    orchestrator: Arc<Orchestrator>,
    plan: Arc<TxnPlan>,
    ctx: TxnCtx,
    state: Arc<watch::Sender<TxnState>>,
    lock: Arc<Mutex<Option<LockHandle>>>,
}

impl Execution {
    fn transition(&self, next: TxnState) {
        tracing::debug!("Transaction state -> {:?}", next);
        self.state.send_replace(next);
    }

    async fn execute(self) -> TxnResult<()> {
        let settings = &self.orchestrator.settings;

        self.transition(TxnState::Locking);
        let handle = match self
            .orchestrator
            .locks
            .acquire(&self.plan.lock_key, settings.lock_timeout)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Could not lock {}: {}", self.plan.lock_key, e);
                self.transition(TxnState::Failed);
                return Err(e.into());
            }
        };
        *self.lock.lock().await = Some(handle);

        let result = self.run_phases().await;

        self.release_lock().await;
        match &result {
            Ok(()) => {
                tracing::info!("Transaction succeeded on {} node(s)", self.plan.nodes.len());
                self.transition(TxnState::Succeeded);
            }
            Err(e) => {
                tracing::error!("Transaction failed: {}", e);
                self.transition(TxnState::Failed);
            }
        }
        result
    }

    async fn run_phases(&self) -> TxnResult<()> {
        // Last phase each node got through
        let mut advanced: HashMap<NodeId, Phase> = HashMap::new();

        for phase in Phase::FORWARD {
            self.transition(phase.running_state());
            let outcome = self.run_phase(phase).await;

            for (node, _) in &outcome.succeeded {
                advanced.insert(*node, phase);
            }

            if outcome.failures.is_empty() {
                let mut fragments: HashMap<NodeId, CtxFragment> =
                    outcome.succeeded.into_iter().collect();
                for node in &self.plan.nodes {
                    if let Some(fragment) = fragments.remove(node) {
                        self.ctx.merge(fragment);
                    }
                }
                tracing::debug!("Phase {} completed on all nodes", phase);
                continue;
            }

            let mut failures = outcome.failures.into_iter();
            let Some(primary) = failures.next() else {
                continue;
            };
            let mut failure = PhaseFailure::new(primary);
            failure.others = failures.collect();

            let targets = self.rollback_targets(&advanced, &failure);
            failure.rollback_failures = self.rollback(&targets).await;

            return Err(TxnError::from_phase_failure(failure));
        }

        Ok(())
    }

    /// Fans `phase` out to every node and waits for the barrier.
    ///
    /// Once a node fails, the others get `grace_period` to answer; whoever is
    /// still silent is counted as a transport failure.
    async fn run_phase(&self, phase: Phase) -> PhaseOutcome {
        let step = self.plan.step(phase).to_string();
        let snapshot = self.ctx.snapshot();
        let grace = self.orchestrator.settings.grace_period;

        let mut pending: HashSet<NodeId> = self.plan.nodes.iter().copied().collect();
        let mut calls = JoinSet::new();
        for node in &self.plan.nodes {
            let node = *node;
            let dispatcher = self.orchestrator.dispatcher.clone();
            let step = step.clone();
            let snapshot = snapshot.clone();
            calls.spawn(
                async move { (node, dispatcher.invoke(node, &step, snapshot).await) }
                    .in_current_span(),
            );
        }

        let mut outcome = PhaseOutcome {
            succeeded: Vec::new(),
            failures: Vec::new(),
        };
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                None => calls.join_next().await,
                Some(deadline) => match tokio::time::timeout_at(deadline, calls.join_next()).await
                {
                    Ok(next) => next,
                    Err(_) => break,
                },
            };

            match next {
                None => break,
                Some(Ok((node, Ok(fragment)))) => {
                    pending.remove(&node);
                    outcome.succeeded.push((node, fragment));
                }
                Some(Ok((node, Err(InvokeError { kind, message })))) => {
                    pending.remove(&node);
                    tracing::warn!("Phase {} failed on node {}: {}", phase, node, message);
                    outcome.failures.push(NodeFailure {
                        node,
                        phase,
                        kind,
                        message,
                    });
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + grace);
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("Dispatch task for phase {} failed: {}", phase, e);
                }
            }
        }
        calls.abort_all();

        // Keep node order for stragglers so reports are stable
        for node in &self.plan.nodes {
            if pending.contains(node) {
                let message = if deadline.is_some() {
                    format!("no reply within {:?} grace period", grace)
                } else {
                    "dispatch task aborted".to_string()
                };
                tracing::warn!("Phase {} on node {}: {}", phase, node, message);
                outcome.failures.push(NodeFailure {
                    node: *node,
                    phase,
                    kind: FailureKind::Transport,
                    message,
                });
            }
        }

        outcome
    }

    /// Nodes that must be compensated, in target order.
    fn rollback_targets(
        &self,
        advanced: &HashMap<NodeId, Phase>,
        failure: &PhaseFailure,
    ) -> Vec<NodeId> {
        let failed_mutating: HashSet<NodeId> = failure
            .failures()
            .filter(|f| f.phase.is_mutating())
            .map(|f| f.node)
            .collect();
        let scope = self.orchestrator.settings.rollback_scope;

        self.plan
            .nodes
            .iter()
            .copied()
            .filter(|node| {
                failed_mutating.contains(node)
                    || match (scope, advanced.get(node)) {
                        (_, None) => false,
                        (RollbackScope::Completed, Some(_)) => true,
                        (RollbackScope::Mutating, Some(phase)) => phase.is_mutating(),
                    }
            })
            .collect()
    }

    /// Best-effort compensation. Every target is attempted; failures are
    /// logged and returned, never raised.
    async fn rollback(&self, targets: &[NodeId]) -> Vec<NodeFailure> {
        self.transition(TxnState::RollingBack);
        if targets.is_empty() {
            tracing::info!("Nothing to roll back");
            return Vec::new();
        }
        tracing::info!("Rolling back on {} node(s)", targets.len());

        let step = self.plan.step(Phase::Rollback).to_string();
        let snapshot = self.ctx.snapshot();

        let mut calls = JoinSet::new();
        for node in targets {
            let node = *node;
            let dispatcher = self.orchestrator.dispatcher.clone();
            let step = step.clone();
            let snapshot = snapshot.clone();
            calls.spawn(
                async move { (node, dispatcher.invoke(node, &step, snapshot).await) }
                    .in_current_span(),
            );
        }

        let mut failed: HashMap<NodeId, NodeFailure> = HashMap::new();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((node, Err(InvokeError { kind, message }))) => {
                    tracing::error!("Rollback failed on node {}: {}", node, message);
                    failed.insert(
                        node,
                        NodeFailure {
                            node,
                            phase: Phase::Rollback,
                            kind,
                            message,
                        },
                    );
                }
                Err(e) => {
                    tracing::error!("Rollback dispatch task failed: {}", e);
                }
            }
        }

        targets
            .iter()
            .filter_map(|node| failed.remove(node))
            .collect()
    }

    async fn release_lock(&self) {
        let handle = self.lock.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = self.orchestrator.locks.release(&handle).await
        {
            // The lease runs out on its own once renewal has stopped
            tracing::warn!("Failed to release lock {}: {}", handle.key(), e);
        }
    }
}
