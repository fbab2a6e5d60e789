//! In-process multi-node harness.
//!
//! Every simulated node gets its own step registry; remote calls go through
//! [`LoopbackTransport`] instead of sockets, and all nodes share one
//! `MemoryStore` the way real peers share the replicated store.

use super::context::TxnCtx;
use super::dispatcher::{Dispatcher, StepTransport, execute_step};
use super::orchestrator::{Orchestrator, TxnBuilder, TxnSettings};
use super::protocol::{StepRequest, StepResponse};
use super::registry::StepRegistry;
use super::types::Phase;
use crate::lock::LockManager;
use crate::peer::store::PeerStore;
use crate::peer::types::{NodeId, PeerInfo};
use crate::store::memory::MemoryStore;
use crate::store::{KvStore, SharedStore};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const STEP_PREFIX: &str = "test";
pub const RESOURCE_PREFIX: &str = "clusterd/volumes/";

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Requests to the node fail immediately.
    Unreachable,
    /// Requests reach the node only after the delay.
    Delay(Duration),
}

pub struct LoopbackTransport {
    nodes: DashMap<NodeId, Arc<StepRegistry>>,
    faults: DashMap<NodeId, Fault>,
    store: SharedStore,
}

impl LoopbackTransport {
    pub fn new(store: SharedStore) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            faults: DashMap::new(),
            store,
        })
    }

    pub fn add_node(&self, id: NodeId, registry: Arc<StepRegistry>) {
        self.nodes.insert(id, registry);
    }

    pub fn set_fault(&self, id: NodeId, fault: Fault) {
        self.faults.insert(id, fault);
    }
}

#[async_trait]
impl StepTransport for LoopbackTransport {
    async fn send(
        &self,
        peer: &PeerInfo,
        request: &StepRequest,
        _timeout: Duration,
    ) -> Result<StepResponse, String> {
        let fault = self.faults.get(&peer.id).map(|f| *f);
        match fault {
            Some(Fault::Unreachable) => return Err(format!("{}: connection refused", peer.name)),
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let registry = self
            .nodes
            .get(&peer.id)
            .map(|r| r.clone())
            .ok_or_else(|| format!("{}: no such node", peer.name))?;

        Ok(execute_step(&registry, &self.store, request.clone()).await)
    }
}

/// What a simulated step does when it runs.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Fail(&'static str),
    Panic,
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub struct Call {
    pub node: String,
    pub phase: Phase,
    pub reqid: String,
    pub at: Instant,
    pub finished: bool,
}

/// Ordered record of every step entry and exit across the cluster.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, node: &str, phase: Phase, reqid: &str, finished: bool) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(Call {
                node: node.to_string(),
                phase,
                reqid: reqid.to_string(),
                at: Instant::now(),
                finished,
            });
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Sorted labels of the nodes that started `phase`.
    pub fn nodes_for(&self, phase: Phase) -> Vec<String> {
        let mut nodes: Vec<String> = self
            .calls()
            .into_iter()
            .filter(|c| c.phase == phase && !c.finished)
            .map(|c| c.node)
            .collect();
        nodes.sort();
        nodes
    }

    /// First entry to last exit of one transaction.
    pub fn window(&self, reqid: &str) -> Option<(Instant, Instant)> {
        let calls: Vec<Call> = self
            .calls()
            .into_iter()
            .filter(|c| c.reqid == reqid && c.phase != Phase::Rollback)
            .collect();
        let start = calls.iter().map(|c| c.at).min()?;
        let end = calls.iter().map(|c| c.at).max()?;
        Some((start, end))
    }
}

type Behaviours = Arc<DashMap<(String, Phase), Behaviour>>;

/// Registry with the `test.*` step set for one simulated node.
///
/// A successful step writes `<Phase>.<node>` and `last_writer` into the
/// context. When the context carries a `resource` name, Store persists it
/// under [`RESOURCE_PREFIX`] and Rollback deletes it.
fn node_registry(label: &str, journal: &Journal, behaviours: &Behaviours) -> Arc<StepRegistry> {
    let mut builder = StepRegistry::builder();
    for phase in [Phase::Stage, Phase::Commit, Phase::Store, Phase::Rollback] {
        let label = label.to_string();
        let journal = journal.clone();
        let behaviours = behaviours.clone();

        let step = move |ctx: TxnCtx| {
            let label = label.clone();
            let journal = journal.clone();
            let behaviour = behaviours.get(&(label.clone(), phase)).map(|b| *b);
            async move {
                journal.record(&label, phase, ctx.reqid(), false);
                match behaviour {
                    Some(Behaviour::Fail(message)) => {
                        journal.record(&label, phase, ctx.reqid(), true);
                        anyhow::bail!(message);
                    }
                    Some(Behaviour::Panic) => panic!("{} blew up in {}", label, phase),
                    Some(Behaviour::Sleep(delay)) => tokio::time::sleep(delay).await,
                    None => {}
                }

                if let Ok(resource) = ctx.get::<String>("resource") {
                    let key = format!("{}{}", RESOURCE_PREFIX, resource);
                    match phase {
                        Phase::Store => ctx.store().put(&key, label.clone()).await?,
                        Phase::Rollback => {
                            ctx.store().delete(&key).await?;
                        }
                        _ => {}
                    }
                }

                ctx.set(&format!("{}.{}", phase, label), &label)?;
                ctx.set("last_writer", &label)?;
                journal.record(&label, phase, ctx.reqid(), true);
                Ok(())
            }
        };

        builder
            .register(&format!("{}.{}", STEP_PREFIX, phase), step)
            .expect("test step names are unique");
    }
    builder.build()
}

/// A simulated cluster. The first label is the orchestrating node.
pub struct TestCluster {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<LoopbackTransport>,
    pub journal: Journal,
    labels: Vec<(String, NodeId)>,
    registries: DashMap<NodeId, Arc<StepRegistry>>,
    behaviours: Behaviours,
}

impl TestCluster {
    pub async fn new(labels: &[&str]) -> Self {
        let store = MemoryStore::new();
        let shared: SharedStore = store.clone();
        let transport = LoopbackTransport::new(shared.clone());
        let journal = Journal::default();
        let behaviours: Behaviours = Arc::new(DashMap::new());
        let peers = PeerStore::new(shared);
        let registries = DashMap::new();

        let mut ids = Vec::new();
        for label in labels {
            let id = NodeId::new();
            peers
                .add_or_update_peer(&PeerInfo {
                    id,
                    name: label.to_string(),
                    addresses: vec![format!("{}.test:24007", label)],
                    store_peer_addr: format!("http://{}.test:2380", label),
                })
                .await
                .unwrap();

            let registry = node_registry(label, &journal, &behaviours);
            transport.add_node(id, registry.clone());
            registries.insert(id, registry);
            ids.push((label.to_string(), id));
        }

        Self {
            store,
            transport,
            journal,
            labels: ids,
            registries,
            behaviours,
        }
    }

    pub fn id(&self, label: &str) -> NodeId {
        self.labels
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, id)| *id)
            .unwrap_or_else(|| panic!("unknown node {}", label))
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.labels.iter().map(|(_, id)| *id).collect()
    }

    pub fn set_behaviour(&self, label: &str, phase: Phase, behaviour: Behaviour) {
        self.behaviours.insert((label.to_string(), phase), behaviour);
    }

    pub fn set_fault(&self, label: &str, fault: Fault) {
        self.transport.set_fault(self.id(label), fault);
    }

    pub fn locks(&self) -> Arc<LockManager> {
        LockManager::new(self.store.clone(), "test-orchestrator", Duration::from_secs(30))
    }

    pub fn orchestrator(&self, settings: TxnSettings) -> Arc<Orchestrator> {
        let local = self.labels[0].1;
        let registry = self
            .registries
            .get(&local)
            .map(|r| r.clone())
            .unwrap_or_else(|| panic!("no registry for local node"));
        let dispatcher = Dispatcher::new(
            local,
            registry,
            self.store.clone(),
            self.transport.clone(),
            Duration::from_secs(30),
        );
        Orchestrator::new(dispatcher, self.locks(), settings)
    }

    /// Builder for the `test.*` step set over `labels`.
    pub fn txn(&self, lock_key: &str, labels: &[&str]) -> TxnBuilder {
        TxnBuilder::with_step_set(
            lock_key,
            labels.iter().map(|l| self.id(l)).collect(),
            STEP_PREFIX,
        )
    }
}
