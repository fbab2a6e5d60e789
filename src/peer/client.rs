use super::types::*;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const ENDPOINT_PEER_VALIDATE_ADD: &str = "/internal/peer/validate-add";
pub const ENDPOINT_PEER_VALIDATE_DELETE: &str = "/internal/peer/validate-delete";
pub const ENDPOINT_PEER_STORE_CONFIG: &str = "/internal/peer/store-config";

/// Calls the bootstrap operations of another node by address.
pub struct PeerClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn call<Req, Resp>(&self, addr: &str, endpoint: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}{}", addr, endpoint);
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(req)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", addr))?
            .error_for_status()?;

        Ok(resp.json::<Resp>().await?)
    }

    pub async fn validate_add(&self, addr: &str, req: &PeerAddRequest) -> Result<PeerAddResponse> {
        self.call(addr, ENDPOINT_PEER_VALIDATE_ADD, req).await
    }

    pub async fn validate_delete(
        &self,
        addr: &str,
        req: &PeerDeleteRequest,
    ) -> Result<PeerGenericResponse> {
        self.call(addr, ENDPOINT_PEER_VALIDATE_DELETE, req).await
    }

    pub async fn store_config(
        &self,
        addr: &str,
        req: &StoreConfigRequest,
    ) -> Result<PeerGenericResponse> {
        self.call(addr, ENDPOINT_PEER_STORE_CONFIG, req).await
    }
}
