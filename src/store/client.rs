//! HTTP client for a store hosted on another node.
//!
//! Idempotent calls are retried with exponential backoff and jitter to ride
//! out transient network blips. Lease creation is sent exactly once: a retry
//! after a lost reply would find our own entry and report contention.

use super::protocol::*;
use super::{KeyValue, KvStore, LeaseId};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpStore {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpStore {
    /// `base_url` is the scheme and authority of the hosting node,
    /// e.g. `http://10.0.0.1:24007`.
    pub fn new(base_url: &str, timeout: Duration, attempts: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    async fn call<T, R>(&self, endpoint: &str, payload: &T, attempts: usize) -> StoreResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.post_with_retry(&url, payload, attempts).await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StoreErrorResponse>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(StoreError::Unavailable(format!(
                "{} returned {}: {}",
                endpoint, status, message
            )));
        }

        Ok(response.json::<R>().await?)
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
        attempts: usize,
    ) -> StoreResult<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url)
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(e.into());
                    }
                    tracing::debug!("Store request to {} failed (attempt {}): {}", url, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(StoreError::Unavailable("retry attempts exhausted".to_string()))
    }
}

#[async_trait]
impl KvStore for HttpStore {
    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        let request = PutRequest {
            key: key.to_string(),
            value,
        };
        let _: AckResponse = self
            .call(ENDPOINT_STORE_PUT, &request, self.attempts)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let request = KeyRequest {
            key: key.to_string(),
        };
        let response: GetResponse = self
            .call(ENDPOINT_STORE_GET, &request, self.attempts)
            .await?;
        Ok(response.value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let request = KeyRequest {
            key: key.to_string(),
        };
        let response: DeleteResponse = self
            .call(ENDPOINT_STORE_DELETE, &request, self.attempts)
            .await?;
        Ok(response.deleted)
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<Vec<KeyValue>> {
        let request = KeyRequest {
            key: prefix.to_string(),
        };
        let response: PrefixResponse = self
            .call(ENDPOINT_STORE_PREFIX, &request, self.attempts)
            .await?;
        Ok(response.entries)
    }

    async fn create_with_lease(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> StoreResult<Option<LeaseId>> {
        let request = LeaseCreateRequest {
            key: key.to_string(),
            value,
            ttl_ms: ttl.as_millis() as u64,
        };
        let response: LeaseCreateResponse = self.call(ENDPOINT_LEASE_CREATE, &request, 1).await?;
        Ok(response.lease)
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<bool> {
        let response: KeepAliveResponse = self
            .call(ENDPOINT_LEASE_KEEPALIVE, &LeaseRequest { lease }, self.attempts)
            .await?;
        Ok(response.alive)
    }

    async fn revoke(&self, lease: LeaseId) -> StoreResult<()> {
        let _: AckResponse = self
            .call(ENDPOINT_LEASE_REVOKE, &LeaseRequest { lease }, self.attempts)
            .await?;
        Ok(())
    }
}
