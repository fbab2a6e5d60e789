use axum::Router;
use clap::Parser;
use clusterd::config::{Args, DaemonConfig};
use clusterd::lock::LockManager;
use clusterd::peer::handlers::peer_routes;
use clusterd::peer::{LocalStoreMember, PeerInfo, PeerService};
use clusterd::store::client::HttpStore;
use clusterd::store::handlers::store_routes;
use clusterd::store::memory::MemoryStore;
use clusterd::store::SharedStore;
use clusterd::transaction::handlers::txn_routes;
use clusterd::transaction::{Dispatcher, HttpTransport, Orchestrator, StepRegistry};
use clusterd::volume::{VolumeSteps, register_vol_create_steps, volume_routes};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = DaemonConfig::from_args(&args)?;
    let node_id = config.resolve_node_id()?;

    tracing::info!(
        "Starting node {} ({}) on {}",
        config.node.name,
        node_id,
        config.node.listen_addr
    );

    // 1. Replicated store:
    let local_store = MemoryStore::new();
    let store: SharedStore = if config.store.host {
        tracing::info!("Hosting the replicated store");
        local_store.clone().spawn_lease_sweeper(Duration::from_secs(1));
        local_store.clone()
    } else {
        let url = config.store_url();
        tracing::info!("Using the replicated store at {}", url);
        Arc::new(HttpStore::new(
            &url,
            config.store_timeout(),
            config.store.retry_attempts,
        ))
    };

    // 2. Step registry, identical on every node:
    let mut builder = StepRegistry::builder();
    register_vol_create_steps(
        &mut builder,
        VolumeSteps::new(node_id, config.node.state_dir.clone()),
    )?;
    let registry = builder.build();
    tracing::info!("Registered steps: {:?}", registry.names());

    // 3. Transaction engine:
    let dispatcher = Dispatcher::new(
        node_id,
        registry.clone(),
        store.clone(),
        Arc::new(HttpTransport::new()),
        config.step_timeout(),
    );
    let locks = LockManager::new(store.clone(), node_id.to_string(), config.lock_ttl());
    let orchestrator = Orchestrator::new(dispatcher, locks, config.txn_settings());
    tracing::info!("Transaction engine ready on node {}", orchestrator.local_id());

    // 4. Peer bootstrap:
    let local = PeerInfo {
        id: node_id,
        name: config.node.name.clone(),
        addresses: vec![config.advertise_addr().to_string()],
        store_peer_addr: config.store_url(),
    };
    let member_config = match LocalStoreMember::load_persisted(&config.node.state_dir).await? {
        Some(persisted) => persisted,
        None => LocalStoreMember::standalone_config(&local.name, &local.store_peer_addr),
    };
    let member = LocalStoreMember::new(
        local_store.clone(),
        config.node.state_dir.clone(),
        member_config,
    );
    let peers = PeerService::new(local, config.node.op_version, store.clone(), member);
    peers.add_self_details().await?;

    // 5. HTTP Router:
    let mut app = Router::new()
        .merge(txn_routes(registry, store))
        .merge(peer_routes(peers))
        .merge(volume_routes(orchestrator));
    if config.store.host {
        app = app.merge(store_routes(local_store));
    }

    let listener = tokio::net::TcpListener::bind(&config.node.listen_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
