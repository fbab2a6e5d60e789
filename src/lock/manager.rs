use crate::error::LockError;
use crate::store::{LOCK_PREFIX, LeaseId, SharedStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const INITIAL_BACKOFF_MS: u64 = 20;
const MAX_BACKOFF_MS: u64 = 500;

/// Proof of holding a resource lock.
///
/// Dropping a handle without releasing it stops lease renewal, so the lock
/// frees itself once the TTL runs out.
pub struct LockHandle {
    key: String,
    lease: LeaseId,
    acquired_at: Instant,
    renewal: JoinHandle<()>,
    released: AtomicBool,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

pub struct LockManager {
    store: SharedStore,
    /// Written as the lock value so operators can see who holds a key.
    holder: String,
    ttl: Duration,
}

impl LockManager {
    pub fn new(store: SharedStore, holder: impl Into<String>, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            holder: holder.into(),
            ttl,
        })
    }

    fn store_key(key: &str) -> String {
        format!("{}{}", LOCK_PREFIX, key)
    }

    /// Blocks until `key` is acquired or `timeout` elapses.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle, LockError> {
        let store_key = Self::store_key(key);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut delay_ms = INITIAL_BACKOFF_MS;

        loop {
            if let Some(lease) = self
                .store
                .create_with_lease(&store_key, self.holder.clone(), self.ttl)
                .await?
            {
                tracing::debug!(
                    "Acquired lock {} (lease {}) after {:?}",
                    key,
                    lease,
                    started.elapsed()
                );
                return Ok(LockHandle {
                    key: key.to_string(),
                    lease,
                    acquired_at: Instant::now(),
                    renewal: self.spawn_lease_renewal(key, lease),
                    released: AtomicBool::new(false),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("Gave up waiting for lock {} after {:?}", key, timeout);
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }

            tracing::trace!("Lock {} is held elsewhere, retrying", key);
            let jitter = rand::random::<u64>() % 10;
            let pause = Duration::from_millis(delay_ms + jitter).min(deadline - now);
            tokio::time::sleep(pause).await;
            delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
        }
    }

    /// Releases the lock. A handle that was already released, or whose lease
    /// already expired, is left alone without error.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        if handle.released.swap(true, Ordering::SeqCst) {
            tracing::trace!("Lock {} already released", handle.key);
            return Ok(());
        }

        handle.renewal.abort();
        self.store.revoke(handle.lease).await?;

        tracing::debug!("Released lock {} after {:?}", handle.key, handle.held_for());
        Ok(())
    }

    /// Current holder of `key`, if any.
    pub async fn holder_of(&self, key: &str) -> Result<Option<String>, LockError> {
        Ok(self.store.get(&Self::store_key(key)).await?)
    }

    /// Renews the lease every third of its TTL until aborted or the lease is lost.
    fn spawn_lease_renewal(&self, key: &str, lease: LeaseId) -> JoinHandle<()> {
        let store = self.store.clone();
        let key = key.to_string();
        let every = (self.ttl / 3).max(Duration::from_millis(10));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;

                match store.keep_alive(lease).await {
                    Ok(true) => {
                        tracing::trace!("Renewed lease {} for lock {}", lease, key);
                    }
                    Ok(false) => {
                        tracing::warn!("Lease {} for lock {} was lost", lease, key);
                        break;
                    }
                    Err(e) => {
                        // Keep trying, the lease may survive a short outage
                        tracing::warn!("Failed to renew lease for lock {}: {}", key, e);
                    }
                }
            }
        })
    }
}
