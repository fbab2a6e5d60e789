//! Daemon configuration.
//!
//! Settings come from an optional TOML file, then command line flags override
//! individual fields. Every section has defaults, so an empty or absent file
//! gives a working single-node daemon.

use crate::peer::service::MIN_OP_VERSION;
use crate::peer::types::NodeId;
use crate::transaction::{RollbackScope, TxnSettings};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File under the state directory holding the generated node id.
pub const NODE_ID_FILE: &str = "node-id";

#[derive(Debug, Clone, Parser)]
#[command(name = "clusterd")]
#[command(about = "Cluster coordination daemon", long_about = None)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node name, unique within the cluster
    #[arg(long)]
    pub name: Option<String>,

    /// Address the RPC server binds to
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Address other nodes reach this one on
    #[arg(long)]
    pub advertise: Option<String>,

    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Use the store hosted by another node instead of hosting one
    #[arg(long)]
    pub store_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub node: NodeConfig,
    pub store: StoreConfig,
    pub txn: TxnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Generated on first start and kept in `state_dir` when unset.
    pub node_id: Option<NodeId>,
    pub name: String,
    pub listen_addr: String,
    /// Falls back to `listen_addr`.
    pub advertise_addr: Option<String>,
    pub state_dir: PathBuf,
    pub op_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Serve the replicated store from this process.
    pub host: bool,
    /// Base URL of the node hosting the store, when not hosting.
    pub url: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnConfig {
    pub lock_timeout_ms: u64,
    /// Lock lease TTL; renewed every third of it while held.
    pub lock_ttl_ms: u64,
    pub step_timeout_ms: u64,
    pub grace_period_ms: u64,
    pub rollback_scope: RollbackScope,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            name: "clusterd".to_string(),
            listen_addr: "127.0.0.1:24007".to_string(),
            advertise_addr: None,
            state_dir: PathBuf::from("./clusterd-state"),
            op_version: MIN_OP_VERSION,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: true,
            url: None,
            request_timeout_ms: 5_000,
            retry_attempts: 3,
        }
    }
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            lock_ttl_ms: 30_000,
            step_timeout_ms: 30_000,
            grace_period_ms: 2_000,
            rollback_scope: RollbackScope::default(),
        }
    }
}

impl DaemonConfig {
    /// Reads `path`, or returns the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// File settings with the command line applied on top.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(name) = &args.name {
            self.node.name = name.clone();
        }
        if let Some(listen) = &args.listen {
            self.node.listen_addr = listen.clone();
        }
        if let Some(advertise) = &args.advertise {
            self.node.advertise_addr = Some(advertise.clone());
        }
        if let Some(dir) = &args.state_dir {
            self.node.state_dir = dir.clone();
        }
        if let Some(url) = &args.store_url {
            self.store.host = false;
            self.store.url = Some(url.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            bail!("node name is required");
        }
        if self.node.listen_addr.is_empty() {
            bail!("listen_addr is required");
        }
        if !self.store.host && self.store.url.is_none() {
            bail!("store.url is required when this node does not host the store");
        }
        if self.txn.lock_ttl_ms == 0 {
            bail!("txn.lock_ttl_ms must be > 0");
        }
        Ok(())
    }

    pub fn advertise_addr(&self) -> &str {
        self.node
            .advertise_addr
            .as_deref()
            .unwrap_or(&self.node.listen_addr)
    }

    /// Where peers reach the store this node uses.
    pub fn store_url(&self) -> String {
        match (&self.store.url, self.store.host) {
            (Some(url), false) => url.clone(),
            _ => format!("http://{}", self.advertise_addr()),
        }
    }

    /// The configured id, else the one persisted in `state_dir`, else a new
    /// one that is persisted for the next start.
    pub fn resolve_node_id(&mut self) -> Result<NodeId> {
        if let Some(id) = self.node.node_id {
            return Ok(id);
        }

        let path = self.node.state_dir.join(NODE_ID_FILE);
        let id = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .trim()
                .parse::<NodeId>()
                .with_context(|| format!("invalid node id in {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = NodeId::new();
                std::fs::create_dir_all(&self.node.state_dir).with_context(|| {
                    format!("failed to create {}", self.node.state_dir.display())
                })?;
                std::fs::write(&path, id.to_string())
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!("Generated node id {}", id);
                id
            }
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };

        self.node.node_id = Some(id);
        Ok(id)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.txn.lock_ttl_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.txn.step_timeout_ms)
    }

    pub fn txn_settings(&self) -> TxnSettings {
        TxnSettings {
            lock_timeout: Duration::from_millis(self.txn.lock_timeout_ms),
            grace_period: Duration::from_millis(self.txn.grace_period_ms),
            rollback_scope: self.txn.rollback_scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["clusterd"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_file() {
        let config = DaemonConfig::load(None).unwrap();

        assert!(config.store.host);
        assert_eq!(config.node.op_version, MIN_OP_VERSION);
        let settings = config.txn_settings();
        assert_eq!(settings.lock_timeout, Duration::from_secs(10));
        assert_eq!(settings.grace_period, Duration::from_secs(2));
        assert_eq!(settings.rollback_scope, RollbackScope::Completed);
        assert_eq!(config.lock_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();

        let config = DaemonConfig::load(Some(dir.path().join("absent.toml").as_path())).unwrap();

        assert_eq!(config.node.listen_addr, "127.0.0.1:24007");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusterd.toml");
        std::fs::write(
            &path,
            r#"
[node]
name = "node-a"

[txn]
grace_period_ms = 500
rollback_scope = "mutating"
"#,
        )
        .unwrap();

        let config = DaemonConfig::load(Some(path.as_path())).unwrap();

        assert_eq!(config.node.name, "node-a");
        assert_eq!(config.txn.grace_period_ms, 500);
        assert_eq!(config.txn.rollback_scope, RollbackScope::Mutating);
        assert_eq!(config.txn.lock_timeout_ms, 10_000);
        assert_eq!(config.store.retry_attempts, 3);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusterd.toml");
        std::fs::write(&path, "[node\nname = ").unwrap();

        assert!(DaemonConfig::load(Some(path.as_path())).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = DaemonConfig::default();

        config.apply_args(&args(&[
            "--name",
            "node-b",
            "--listen",
            "0.0.0.0:24008",
            "--advertise",
            "10.0.0.2:24008",
            "--store-url",
            "http://10.0.0.1:24007",
        ]));

        assert_eq!(config.node.name, "node-b");
        assert_eq!(config.node.listen_addr, "0.0.0.0:24008");
        assert_eq!(config.advertise_addr(), "10.0.0.2:24008");
        assert!(!config.store.host);
        assert_eq!(config.store_url(), "http://10.0.0.1:24007");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hosted_store_url_is_the_advertised_address() {
        let mut config = DaemonConfig::default();
        config.node.listen_addr = "10.0.0.1:24007".to_string();

        assert_eq!(config.store_url(), "http://10.0.0.1:24007");
    }

    #[test]
    fn test_remote_store_requires_url() {
        let mut config = DaemonConfig::default();
        config.store.host = false;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_id_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = DaemonConfig::default();
        first.node.state_dir = dir.path().join("state");

        let id = first.resolve_node_id().unwrap();

        let mut second = DaemonConfig::default();
        second.node.state_dir = dir.path().join("state");
        assert_eq!(second.resolve_node_id().unwrap(), id);
        assert_eq!(first.node.node_id, Some(id));
    }

    #[test]
    fn test_configured_node_id_wins() {
        let id = NodeId::new();
        let mut config = DaemonConfig::default();
        config.node.node_id = Some(id);
        config.node.state_dir = PathBuf::from("/nonexistent/never-created");

        assert_eq!(config.resolve_node_id().unwrap(), id);
    }
}
