//! Lock Module Tests
//!
//! All tests run on a paused clock so lease expiry and backoff are deterministic.

#[cfg(test)]
mod tests {
    use crate::error::LockError;
    use crate::lock::LockManager;
    use crate::store::memory::MemoryStore;
    use crate::store::{KvStore, SharedStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn shared(store: &Arc<MemoryStore>) -> SharedStore {
        store.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_writes_holder_and_release_frees_key() {
        let store = MemoryStore::new();
        let locks = LockManager::new(shared(&store), "node-a", Duration::from_secs(30));

        let handle = locks.acquire("vol1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(handle.key(), "vol1");
        assert_eq!(
            locks.holder_of("vol1").await.unwrap(),
            Some("node-a".to_string())
        );

        locks.release(&handle).await.unwrap();
        assert!(handle.is_released());
        assert_eq!(locks.holder_of("vol1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_times_out() {
        let store = MemoryStore::new();
        let a = LockManager::new(shared(&store), "node-a", Duration::from_secs(30));
        let b = LockManager::new(shared(&store), "node-b", Duration::from_secs(30));

        let _held = a.acquire("vol1", Duration::from_secs(1)).await.unwrap();

        let err = b
            .acquire("vol1", Duration::from_millis(300))
            .await
            .err()
            .expect("Second acquirer must time out");

        match err {
            LockError::Timeout { key, waited_ms } => {
                assert_eq!(key, "vol1");
                assert!(waited_ms >= 300, "waited only {}ms", waited_ms);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_acquires_after_release() {
        let store = MemoryStore::new();
        let a = LockManager::new(shared(&store), "node-a", Duration::from_secs(30));
        let b = LockManager::new(shared(&store), "node-b", Duration::from_secs(30));

        let held = a.acquire("vol1", Duration::from_secs(1)).await.unwrap();

        let waiter = tokio::spawn(async move { b.acquire("vol1", Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        a.release(&held).await.unwrap();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.key(), "vol1");
        assert_eq!(
            store.get("clusterd/locks/vol1").await.unwrap(),
            Some("node-b".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let store = MemoryStore::new();
        let a = LockManager::new(shared(&store), "node-a", Duration::from_secs(30));
        let b = LockManager::new(shared(&store), "node-b", Duration::from_secs(30));

        let first = a.acquire("vol1", Duration::from_secs(1)).await.unwrap();
        a.release(&first).await.unwrap();

        // Someone else takes the key; a second release of the old handle must not steal it
        let _second = b.acquire("vol1", Duration::from_secs(1)).await.unwrap();
        a.release(&first).await.unwrap();

        assert_eq!(
            b.holder_of("vol1").await.unwrap(),
            Some("node-b".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disjoint_keys_do_not_contend() {
        let store = MemoryStore::new();
        let locks = LockManager::new(shared(&store), "node-a", Duration::from_secs(30));

        let one = locks.acquire("vol1", Duration::from_millis(50)).await.unwrap();
        let two = locks.acquire("vol2", Duration::from_millis(50)).await.unwrap();

        assert_ne!(one.lease(), two.lease());
    }

    // ============================================================
    // LEASES
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lock_past_ttl() {
        let store = MemoryStore::new();
        let a = LockManager::new(shared(&store), "node-a", Duration::from_secs(3));
        let b = LockManager::new(shared(&store), "node-b", Duration::from_secs(3));

        let _held = a.acquire("vol1", Duration::from_secs(1)).await.unwrap();

        // Well past a single TTL; the renewal sidecar must have kept the lease alive
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(b.acquire("vol1", Duration::from_millis(100)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lock_expires() {
        let store = MemoryStore::new();
        let crashed = LockManager::new(shared(&store), "node-a", Duration::from_secs(3));
        let survivor = LockManager::new(shared(&store), "node-b", Duration::from_secs(3));

        // Dropping without release simulates a holder that died mid-transaction
        let handle = crashed.acquire("vol1", Duration::from_secs(1)).await.unwrap();
        drop(handle);

        let taken = survivor
            .acquire("vol1", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(taken.key(), "vol1");
        assert_eq!(
            survivor.holder_of("vol1").await.unwrap(),
            Some("node-b".to_string())
        );
    }
}
