//! Volume entries in the replicated store, one per volume under
//! `clusterd/volumes/<name>`.

use super::types::Volinfo;
use crate::error::{StoreError, StoreResult};
use crate::store::SharedStore;

use std::collections::BTreeMap;
use uuid::Uuid;

pub const VOLUME_PREFIX: &str = "clusterd/volumes/";

#[derive(Clone)]
pub struct VolumeStore {
    store: SharedStore,
}

impl VolumeStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn key(name: &str) -> String {
        format!("{}{}", VOLUME_PREFIX, name)
    }

    pub async fn add_or_update_volume(&self, vol: &Volinfo) -> StoreResult<()> {
        let json = serde_json::to_string(vol).map_err(|e| {
            tracing::error!("Failed to marshal volinfo {}: {}", vol.name, e);
            StoreError::from(e)
        })?;
        self.store.put(&Self::key(&vol.name), json).await
    }

    pub async fn get_volume(&self, name: &str) -> StoreResult<Volinfo> {
        match self.store.get(&Self::key(name)).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(format!("volume {}", name))),
        }
    }

    pub async fn delete_volume(&self, name: &str) -> StoreResult<bool> {
        self.store.delete(&Self::key(name)).await
    }

    /// Volume names mapped to their ids.
    pub async fn get_volumes_list(&self) -> StoreResult<BTreeMap<String, Uuid>> {
        Ok(self
            .get_volumes()
            .await?
            .into_iter()
            .map(|vol| (vol.name, vol.id))
            .collect())
    }

    /// Every decodable volume. Undecodable entries are logged and skipped.
    pub async fn get_volumes(&self) -> StoreResult<Vec<Volinfo>> {
        let entries = self.store.get_prefix(VOLUME_PREFIX).await?;
        let mut volumes = Vec::with_capacity(entries.len());
        for kv in entries {
            match serde_json::from_str::<Volinfo>(&kv.value) {
                Ok(vol) => volumes.push(vol),
                Err(e) => tracing::error!("Failed to unmarshal volume {}: {}", kv.key, e),
            }
        }
        Ok(volumes)
    }

    /// A store failure counts as "does not exist".
    pub async fn volume_exists(&self, name: &str) -> bool {
        matches!(self.store.get(&Self::key(name)).await, Ok(Some(_)))
    }
}
