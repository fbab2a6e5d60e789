//! The `vol-create.*` step set.
//!
//! - **Stage** checks the name is free and this node's bricks are usable,
//!   without touching anything.
//! - **Commit** writes this node's volfiles under `<state_dir>/vols/<name>/`.
//! - **Store** records the volume in the replicated store.
//! - **Rollback** removes the volfiles and the store entry, unless the stored
//!   volume under that name has a different id.

use super::store::VolumeStore;
use super::types::{Brickinfo, VolAuth, VolCreateRequest, Volinfo};
use crate::error::{StoreError, TxnResult};
use crate::peer::types::NodeId;
use crate::transaction::{StepRegistryBuilder, TxnCtx};

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const VOL_CREATE: &str = "vol-create";

pub const CTX_REQ: &str = "req";
pub const CTX_VOLINFO: &str = "volinfo";
pub const CTX_VOLAUTH: &str = "volauth";

/// Node-local facts the volume steps need.
pub struct VolumeSteps {
    local_id: NodeId,
    state_dir: PathBuf,
}

impl VolumeSteps {
    pub fn new(local_id: NodeId, state_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            state_dir: state_dir.into(),
        })
    }

    pub fn volfile_dir(&self, volume: &str) -> PathBuf {
        self.state_dir.join("vols").join(volume)
    }

    async fn validate(&self, ctx: TxnCtx) -> Result<()> {
        let req: VolCreateRequest = ctx.get(CTX_REQ)?;
        let vol: Volinfo = ctx.get(CTX_VOLINFO)?;

        let volumes = VolumeStore::new(ctx.store().clone());
        match volumes.get_volume(&vol.name).await {
            Ok(other) if other.id != vol.id => bail!("volume {} already exists", vol.name),
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let existing = volumes.get_volumes().await?;
        for brick in vol.bricks_on(self.local_id) {
            validate_brick(brick, req.force)?;

            if let Some(owner) = existing.iter().find(|other| {
                other.id != vol.id
                    && other
                        .bricks
                        .iter()
                        .any(|b| b.node_id == brick.node_id && b.path == brick.path)
            }) {
                bail!(
                    "brick {}:{} is already part of volume {}",
                    brick.hostname,
                    brick.path,
                    owner.name
                );
            }
        }

        ctx.logger().in_scope(|| {
            tracing::debug!("Validated bricks of volume {} on this node", vol.name);
        });
        Ok(())
    }

    async fn generate_volfiles(&self, ctx: TxnCtx) -> Result<()> {
        let vol: Volinfo = ctx
            .get(CTX_VOLINFO)
            .context("failed to get volinfo from context")?;
        let auth: VolAuth = ctx
            .get(CTX_VOLAUTH)
            .context("failed to get volauth from context")?;

        let dir = self.volfile_dir(&vol.name);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        write_volfile(&dir.join(format!("{}.fuse.vol", vol.name)), &client_volfile(&vol)).await?;
        for brick in vol.bricks_on(self.local_id) {
            let file = format!("{}.{}.vol", vol.name, brick_file_stem(brick));
            write_volfile(&dir.join(file), &brick_volfile(&vol, brick, &auth)).await?;
        }

        ctx.logger().in_scope(|| {
            tracing::info!("Generated volfiles for volume {} in {}", vol.name, dir.display());
        });
        Ok(())
    }

    async fn store_volume(&self, ctx: TxnCtx) -> Result<()> {
        let vol: Volinfo = ctx
            .get(CTX_VOLINFO)
            .context("failed to get volinfo from context")?;

        VolumeStore::new(ctx.store().clone())
            .add_or_update_volume(&vol)
            .await
            .with_context(|| format!("failed to store volume {}", vol.name))?;

        ctx.logger()
            .in_scope(|| tracing::debug!("New volume {} added", vol.name));
        Ok(())
    }

    async fn rollback(&self, ctx: TxnCtx) -> Result<()> {
        let vol: Volinfo = ctx
            .get(CTX_VOLINFO)
            .context("failed to get volinfo from context")?;

        // Only undo what this transaction created; the name may belong to
        // a volume committed by an earlier transaction.
        let volumes = VolumeStore::new(ctx.store().clone());
        let owned = match volumes.get_volume(&vol.name).await {
            Ok(stored) => stored.id == vol.id,
            Err(StoreError::NotFound(_)) => true,
            Err(e) => return Err(e.into()),
        };
        if !owned {
            ctx.logger().in_scope(|| {
                tracing::info!("Volume {} belongs to another transaction, nothing to roll back", vol.name)
            });
            return Ok(());
        }

        let dir = self.volfile_dir(&vol.name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("failed to remove {}", dir.display())),
        }

        volumes.delete_volume(&vol.name).await?;

        ctx.logger()
            .in_scope(|| tracing::info!("Rolled back creation of volume {}", vol.name));
        Ok(())
    }
}

/// Registers the `vol-create.*` steps for this node.
pub fn register_vol_create_steps(
    builder: &mut StepRegistryBuilder,
    steps: Arc<VolumeSteps>,
) -> TxnResult<()> {
    let stage = steps.clone();
    let commit = steps.clone();
    let store = steps.clone();
    let rollback = steps;

    builder
        .register("vol-create.Stage", move |ctx| {
            let steps = stage.clone();
            async move { steps.validate(ctx).await }
        })?
        .register("vol-create.Commit", move |ctx| {
            let steps = commit.clone();
            async move { steps.generate_volfiles(ctx).await }
        })?
        .register("vol-create.Store", move |ctx| {
            let steps = store.clone();
            async move { steps.store_volume(ctx).await }
        })?
        .register("vol-create.Rollback", move |ctx| {
            let steps = rollback.clone();
            async move { steps.rollback(ctx).await }
        })?;
    Ok(())
}

fn validate_brick(brick: &Brickinfo, force: bool) -> Result<()> {
    let path = Path::new(&brick.path);
    if !path.is_absolute() {
        bail!("brick path {} is not absolute", brick.path);
    }
    if path.parent().is_none() && !force {
        bail!(
            "brick path {} is the filesystem root, use force to override",
            brick.path
        );
    }
    Ok(())
}

fn brick_file_stem(brick: &Brickinfo) -> String {
    format!(
        "{}.{}",
        brick.hostname,
        brick.path.trim_start_matches('/').replace('/', "-")
    )
}

fn client_volfile(vol: &Volinfo) -> String {
    let mut out = String::new();
    let mut subvolumes = Vec::new();
    for (i, brick) in vol.bricks.iter().enumerate() {
        let name = format!("{}-client-{}", vol.name, i);
        out.push_str(&format!(
            "volume {}\n    type protocol/client\n    option remote-host {}\n    option remote-subvolume {}\nend-volume\n\n",
            name, brick.hostname, brick.path
        ));
        subvolumes.push(name);
    }
    out.push_str(&format!(
        "volume {}\n    type cluster/distribute\n    subvolumes {}\nend-volume\n",
        vol.name,
        subvolumes.join(" ")
    ));
    out
}

fn brick_volfile(vol: &Volinfo, brick: &Brickinfo, auth: &VolAuth) -> String {
    format!(
        "volume {vol}-posix\n    type storage/posix\n    option directory {path}\n    option volume-id {id}\nend-volume\n\n\
         volume {vol}-server\n    type protocol/server\n    option auth.login.{path}.allow {user}\n    \
         option auth.login.{user}.password {password}\n    subvolumes {vol}-posix\nend-volume\n",
        vol = vol.name,
        path = brick.path,
        id = vol.id,
        user = auth.username,
        password = auth.password,
    )
}

async fn write_volfile(path: &Path, content: &str) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write volfile {}", path.display()))
}
