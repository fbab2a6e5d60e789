//! Volume Module Tests
//!
//! ## Test Scopes
//! - **Parsing / Store**: brick strings and the volume namespace.
//! - **Create flow**: the real `vol-create.*` steps on a two-node loopback
//!   cluster, each node with its own state directory.
//! - **Same-name serialization**: racing creates and rollback ownership.
//! - **HTTP**: the volume create endpoint.

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, VolumeError};
    use crate::lock::LockManager;
    use crate::peer::store::PeerStore;
    use crate::peer::types::{NodeId, PeerInfo};
    use crate::store::memory::MemoryStore;
    use crate::store::{KvStore, SharedStore};
    use crate::transaction::testkit::LoopbackTransport;
    use crate::transaction::{Dispatcher, Orchestrator, StepRegistry, TxnCtx, TxnSettings};
    use crate::volume::create::{
        create_volinfo, create_volume, nodes_for_vol_create, validate_request,
    };
    use crate::volume::steps::{CTX_REQ, CTX_VOLINFO, VolumeSteps, register_vol_create_steps};
    use crate::volume::handlers::{ENDPOINT_VOLUMES, volume_routes};
    use crate::volume::store::{VOLUME_PREFIX, VolumeStore};
    use crate::volume::types::*;

    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct VolCluster {
        store: Arc<MemoryStore>,
        orchestrator: Arc<Orchestrator>,
        nodes: Vec<(NodeId, TempDir)>,
    }

    impl VolCluster {
        fn id(&self, i: usize) -> NodeId {
            self.nodes[i].0
        }

        fn volfile_dir(&self, i: usize, volume: &str) -> std::path::PathBuf {
            self.nodes[i].1.path().join("vols").join(volume)
        }

        fn volumes(&self) -> VolumeStore {
            VolumeStore::new(self.store.clone())
        }
    }

    /// Nodes are `node-<i>` serving on `10.0.0.<i+1>:24007`; node 0 orchestrates.
    async fn vol_cluster(size: usize) -> VolCluster {
        let store = MemoryStore::new();
        let shared: SharedStore = store.clone();
        let transport = LoopbackTransport::new(shared.clone());
        let peers = PeerStore::new(shared.clone());

        let mut nodes = Vec::new();
        let mut local_registry = None;
        for i in 0..size {
            let id = NodeId::new();
            let dir = tempfile::tempdir().unwrap();
            peers
                .add_or_update_peer(&PeerInfo {
                    id,
                    name: format!("node-{}", i),
                    addresses: vec![format!("10.0.0.{}:24007", i + 1)],
                    store_peer_addr: format!("http://10.0.0.{}:2380", i + 1),
                })
                .await
                .unwrap();

            let mut builder = StepRegistry::builder();
            register_vol_create_steps(&mut builder, VolumeSteps::new(id, dir.path())).unwrap();
            let registry = builder.build();
            transport.add_node(id, registry.clone());
            if local_registry.is_none() {
                local_registry = Some(registry);
            }
            nodes.push((id, dir));
        }

        let dispatcher = Dispatcher::new(
            nodes[0].0,
            local_registry.unwrap(),
            shared.clone(),
            transport,
            Duration::from_secs(5),
        );
        let locks = LockManager::new(shared, "node-0", Duration::from_secs(30));
        let orchestrator = Orchestrator::new(dispatcher, locks, TxnSettings::default());

        VolCluster {
            store,
            orchestrator,
            nodes,
        }
    }

    /// Runs one `vol-create.*` step of node `i` directly against `vol`.
    async fn run_step(
        cluster: &VolCluster,
        i: usize,
        step: &str,
        req: &VolCreateRequest,
        vol: &Volinfo,
    ) -> anyhow::Result<()> {
        let mut builder = StepRegistry::builder();
        register_vol_create_steps(
            &mut builder,
            VolumeSteps::new(cluster.id(i), cluster.nodes[i].1.path()),
        )
        .unwrap();
        let registry = builder.build();

        let ctx = TxnCtx::new("req-direct", cluster.store.clone());
        ctx.set(CTX_REQ, req).unwrap();
        ctx.set(CTX_VOLINFO, vol).unwrap();
        let step = registry.lookup(step).unwrap();
        step(ctx).await
    }

    fn request(name: &str, bricks: Vec<String>) -> VolCreateRequest {
        VolCreateRequest {
            name: name.to_string(),
            bricks,
            force: false,
        }
    }

    // ============================================================
    // PARSING AND STORE
    // ============================================================

    #[test]
    fn test_parse_brick_formats() {
        let id = Uuid::new_v4().to_string();
        let by_id = format!("{}:/bricks/b1", id);

        assert_eq!(parse_brick(&by_id).unwrap(), (id.as_str(), "/bricks/b1"));
        assert_eq!(
            parse_brick("10.0.0.1:24007:/bricks/b1").unwrap(),
            ("10.0.0.1:24007", "/bricks/b1")
        );
        assert_eq!(
            parse_brick("10.0.0.1:/bricks/b1").unwrap(),
            ("10.0.0.1", "/bricks/b1")
        );

        for bad in ["no-path", ":/bricks/b1", "host:relative/path"] {
            assert!(
                matches!(parse_brick(bad), Err(VolumeError::InvalidBrick(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_volume_store_namespace() {
        let store = MemoryStore::new();
        let volumes = VolumeStore::new(store.clone());
        let vol = Volinfo {
            id: Uuid::new_v4(),
            name: "vol1".to_string(),
            bricks: Vec::new(),
        };

        volumes.add_or_update_volume(&vol).await.unwrap();
        assert!(volumes.volume_exists("vol1").await);
        assert_eq!(volumes.get_volume("vol1").await.unwrap(), vol);

        // A corrupt entry is skipped by scans, not fatal
        store
            .put(&format!("{}broken", VOLUME_PREFIX), "{not json".to_string())
            .await
            .unwrap();
        assert_eq!(volumes.get_volumes().await.unwrap(), vec![vol.clone()]);
        let list = volumes.get_volumes_list().await.unwrap();
        assert_eq!(list.get("vol1"), Some(&vol.id));

        assert!(volumes.delete_volume("vol1").await.unwrap());
        assert!(!volumes.volume_exists("vol1").await);
        assert!(volumes.get_volume("vol1").await.is_err());
    }

    #[tokio::test]
    async fn test_nodes_for_vol_create_resolves_every_format() {
        let cluster = vol_cluster(2).await;
        let peers = PeerStore::new(cluster.store.clone());

        let req = request(
            "vol1",
            vec![
                format!("{}:/bricks/b1", cluster.id(1)),
                "10.0.0.1:24007:/bricks/b2".to_string(),
                "10.0.0.2:/bricks/b3".to_string(),
            ],
        );
        let nodes = nodes_for_vol_create(&peers, &req).await.unwrap();
        assert_eq!(nodes, vec![cluster.id(1), cluster.id(0), cluster.id(1)]);

        let unknown = request("vol1", vec!["10.9.9.9:/bricks/b1".to_string()]);
        assert!(matches!(
            nodes_for_vol_create(&peers, &unknown).await,
            Err(VolumeError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_request_validation() {
        assert!(matches!(
            validate_request(&request("", vec!["h:/b".to_string()])),
            Err(VolumeError::EmptyName)
        ));
        assert!(matches!(
            validate_request(&request("vol1", Vec::new())),
            Err(VolumeError::EmptyBrickList)
        ));
    }

    // ============================================================
    // CREATE FLOW
    // ============================================================

    #[tokio::test]
    async fn test_create_volume_on_two_nodes() {
        // ARRANGE
        let cluster = vol_cluster(2).await;
        let req = request(
            "vol1",
            vec![
                "10.0.0.1:/bricks/b1".to_string(),
                format!("{}:/bricks/b2", cluster.id(1)),
            ],
        );

        // ACT
        let vol = create_volume(&cluster.orchestrator, req).await.unwrap();

        // ASSERT: recorded once in the store
        assert_eq!(vol.name, "vol1");
        assert_eq!(vol.bricks.len(), 2);
        assert_eq!(vol.bricks[0].hostname, "node-0");
        assert_eq!(vol.bricks[1].node_id, cluster.id(1));
        assert_eq!(cluster.volumes().get_volume("vol1").await.unwrap(), vol);

        // ASSERT: each node wrote the client volfile and its own brick volfile
        let dir_a = cluster.volfile_dir(0, "vol1");
        let dir_b = cluster.volfile_dir(1, "vol1");
        assert!(dir_a.join("vol1.fuse.vol").exists());
        assert!(dir_a.join("vol1.node-0.bricks-b1.vol").exists());
        assert!(!dir_a.join("vol1.node-1.bricks-b2.vol").exists());
        assert!(dir_b.join("vol1.node-1.bricks-b2.vol").exists());

        let lock = cluster.store.get("clusterd/locks/vol1").await.unwrap();
        assert_eq!(lock, None);
    }

    #[tokio::test]
    async fn test_create_existing_volume_is_rejected_before_txn() {
        let cluster = vol_cluster(1).await;
        let req = request("vol1", vec!["10.0.0.1:/bricks/b1".to_string()]);
        create_volume(&cluster.orchestrator, req.clone()).await.unwrap();

        let again = create_volume(&cluster.orchestrator, req).await;

        assert!(matches!(again, Err(VolumeError::Exists(name)) if name == "vol1"));
    }

    #[tokio::test]
    async fn test_root_brick_fails_stage_and_leaves_nothing() {
        // ARRANGE: node-1 offers the filesystem root without force
        let cluster = vol_cluster(2).await;
        let req = request(
            "vol1",
            vec![
                "10.0.0.1:/bricks/b1".to_string(),
                "10.0.0.2:/".to_string(),
            ],
        );

        // ACT
        let err = create_volume(&cluster.orchestrator, req).await.unwrap_err();

        // ASSERT
        let VolumeError::Txn(txn_err) = err else {
            panic!("expected a transaction error, got {err}");
        };
        assert_eq!(txn_err.kind(), ErrorKind::Step);
        let failure = txn_err.phase_failure().unwrap();
        assert_eq!(failure.primary.node, cluster.id(1));
        assert!(failure.primary.message.contains("filesystem root"));

        assert!(!cluster.volumes().volume_exists("vol1").await);
        assert!(!cluster.volfile_dir(0, "vol1").exists());
        assert!(!cluster.volfile_dir(1, "vol1").exists());
    }

    #[tokio::test]
    async fn test_root_brick_allowed_with_force() {
        let cluster = vol_cluster(1).await;
        let mut req = request("vol1", vec!["10.0.0.1:/".to_string()]);
        req.force = true;

        let vol = create_volume(&cluster.orchestrator, req).await.unwrap();

        assert_eq!(vol.bricks[0].path, "/");
    }

    #[tokio::test]
    async fn test_brick_in_use_is_rejected() {
        let cluster = vol_cluster(1).await;
        create_volume(
            &cluster.orchestrator,
            request("vol1", vec!["10.0.0.1:/bricks/b1".to_string()]),
        )
        .await
        .unwrap();

        let err = create_volume(
            &cluster.orchestrator,
            request("vol2", vec!["10.0.0.1:/bricks/b1".to_string()]),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("already part of volume vol1"));
        assert!(cluster.volumes().volume_exists("vol1").await);
        assert!(!cluster.volumes().volume_exists("vol2").await);
        // vol1's files are untouched by vol2's rollback
        assert!(cluster.volfile_dir(0, "vol1").join("vol1.fuse.vol").exists());
    }

    // ============================================================
    // SAME-NAME SERIALIZATION
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_creates_of_same_name_keep_one_volume() {
        // ARRANGE: two creates of vol1 with different bricks
        let cluster = vol_cluster(2).await;
        let first = request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]);
        let second = request("vol1", vec!["10.0.0.2:/bricks/b".to_string()]);

        // ACT
        let (a, b) = tokio::join!(
            create_volume(&cluster.orchestrator, first),
            create_volume(&cluster.orchestrator, second)
        );

        // ASSERT: exactly one wins and the store holds the winner
        let winner = match (a, b) {
            (Ok(vol), Err(e)) | (Err(e), Ok(vol)) => {
                assert!(e.to_string().contains("already exists"), "unexpected error: {e}");
                vol
            }
            (a, b) => panic!("expected exactly one success, got {:?} and {:?}", a, b),
        };
        let stored = cluster.volumes().get_volume("vol1").await.unwrap();
        assert_eq!(stored, winner);

        let winner_node = if winner.bricks[0].path == "/bricks/a" { 0 } else { 1 };
        assert!(cluster.volfile_dir(winner_node, "vol1").join("vol1.fuse.vol").exists());
    }

    #[tokio::test]
    async fn test_stage_rejects_name_taken_by_another_volume() {
        let cluster = vol_cluster(1).await;
        create_volume(
            &cluster.orchestrator,
            request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]),
        )
        .await
        .unwrap();

        // A create that raced past the pre-lock check
        let req = request("vol1", vec!["10.0.0.1:/bricks/b".to_string()]);
        let peers = PeerStore::new(cluster.store.clone());
        let late = create_volinfo(&peers, &req).await.unwrap();

        let err = run_step(&cluster, 0, "vol-create.Stage", &req, &late)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("volume vol1 already exists"));
    }

    #[tokio::test]
    async fn test_rollback_leaves_volume_owned_by_another_txn() {
        // ARRANGE: vol1 committed, then a failed create of the same name
        let cluster = vol_cluster(1).await;
        let winner = create_volume(
            &cluster.orchestrator,
            request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]),
        )
        .await
        .unwrap();
        let req = request("vol1", vec!["10.0.0.1:/bricks/b".to_string()]);
        let peers = PeerStore::new(cluster.store.clone());
        let loser = create_volinfo(&peers, &req).await.unwrap();
        assert_ne!(loser.id, winner.id);

        // ACT
        run_step(&cluster, 0, "vol-create.Rollback", &req, &loser)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(cluster.volumes().get_volume("vol1").await.unwrap(), winner);
        assert!(cluster.volfile_dir(0, "vol1").join("vol1.fuse.vol").exists());
    }

    #[tokio::test]
    async fn test_rollback_removes_own_volume() {
        let cluster = vol_cluster(1).await;
        let vol = create_volume(
            &cluster.orchestrator,
            request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]),
        )
        .await
        .unwrap();
        let req = request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]);

        run_step(&cluster, 0, "vol-create.Rollback", &req, &vol)
            .await
            .unwrap();

        assert!(!cluster.volumes().volume_exists("vol1").await);
        assert!(!cluster.volfile_dir(0, "vol1").exists());
    }

    // ============================================================
    // HTTP
    // ============================================================

    #[tokio::test]
    async fn test_volume_create_over_http() {
        // ARRANGE
        let cluster = vol_cluster(1).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = volume_routes(cluster.orchestrator.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = format!("http://{}{}", addr, ENDPOINT_VOLUMES);
        let client = reqwest::Client::new();
        let req = request("vol1", vec!["10.0.0.1:/bricks/a".to_string()]);

        // ACT
        let created = client.post(&url).json(&req).send().await.unwrap();
        let duplicate = client.post(&url).json(&req).send().await.unwrap();
        let invalid = client
            .post(&url)
            .json(&request("", vec!["10.0.0.1:/bricks/a".to_string()]))
            .send()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(created.status(), reqwest::StatusCode::CREATED);
        let body: VolCreateResponse = created.json().await.unwrap();
        assert!(body.ok);
        assert_eq!(
            body.volume,
            Some(cluster.volumes().get_volume("vol1").await.unwrap())
        );

        assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);
        let body: VolCreateResponse = duplicate.json().await.unwrap();
        assert!(!body.ok);
        assert_eq!(body.error.as_deref(), Some("volume vol1 already exists"));

        assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
