use super::{KeyValue, KvStore, LeaseId};
use crate::error::StoreResult;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct LeaseState {
    ttl: Duration,
    expires_at: Instant,
    keys: Vec<String>,
}

/// In-process store backend.
///
/// Entries bound to a lease are considered gone as soon as the lease expires;
/// they are dropped lazily on access and by [`MemoryStore::purge_expired`].
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    leases: DashMap<LeaseId, LeaseState>,
    next_lease: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn is_live(&self, lease: Option<LeaseId>) -> bool {
        match lease {
            None => true,
            Some(id) => self
                .leases
                .get(&id)
                .map(|state| state.expires_at > Instant::now())
                .unwrap_or(false),
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let stale = match self.entries.get(key) {
            Some(entry) if self.is_live(entry.lease) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if stale {
            self.entries
                .remove_if(key, |_, entry| !self.is_live(entry.lease));
        }
        None
    }

    /// Drops every expired lease together with the entries bound to it.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|state| state.value().expires_at <= now)
            .map(|state| *state.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            if let Some((_, state)) = self.leases.remove(&id) {
                for key in state.keys {
                    if self
                        .entries
                        .remove_if(&key, |_, entry| entry.lease == Some(id))
                        .is_some()
                    {
                        removed += 1;
                    }
                }
                tracing::debug!("Lease {} expired", id);
            }
        }
        removed
    }

    /// Removes all data and leases. Used when the local store member is destroyed.
    pub fn clear(&self) {
        self.entries.clear();
        self.leases.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| self.is_live(entry.value().lease))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically purges expired leases until the returned handle is aborted.
    pub fn spawn_lease_sweeper(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    tracing::debug!("Lease sweeper removed {} expired entries", removed);
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            leases: DashMap::new(),
            next_lease: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), StoredValue { value, lease: None });
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| self.is_live(entry.lease))
            .unwrap_or(false))
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let mut entries: Vec<KeyValue> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && self.is_live(entry.value().lease))
            .map(|entry| KeyValue {
                key: entry.key().clone(),
                value: entry.value().value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn create_with_lease(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> StoreResult<Option<LeaseId>> {
        let id = LeaseId(self.next_lease.fetch_add(1, Ordering::SeqCst));

        // The lease must exist before the entry points at it, otherwise a
        // concurrent reader would see the entry as expired.
        self.leases.insert(
            id,
            LeaseState {
                ttl,
                expires_at: Instant::now() + ttl,
                keys: vec![key.to_string()],
            },
        );

        let created = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if self.is_live(occupied.get().lease) {
                    false
                } else {
                    occupied.insert(StoredValue {
                        value,
                        lease: Some(id),
                    });
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue {
                    value,
                    lease: Some(id),
                });
                true
            }
        };

        if created {
            Ok(Some(id))
        } else {
            self.leases.remove(&id);
            Ok(None)
        }
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<bool> {
        match self.leases.get_mut(&lease) {
            Some(mut state) => {
                let now = Instant::now();
                if state.expires_at <= now {
                    return Ok(false);
                }
                state.expires_at = now + state.ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> StoreResult<()> {
        if let Some((_, state)) = self.leases.remove(&lease) {
            for key in state.keys {
                self.entries
                    .remove_if(&key, |_, entry| entry.lease == Some(lease));
            }
        }
        Ok(())
    }
}
