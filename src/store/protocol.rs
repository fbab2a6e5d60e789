//! Store Network Protocol
//!
//! Endpoints and DTOs exposed by the node that hosts the store. Every request is
//! a JSON `POST`; keys and values travel as plain strings.

use super::{KeyValue, LeaseId};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_STORE_PUT: &str = "/internal/store/put";
pub const ENDPOINT_STORE_GET: &str = "/internal/store/get";
pub const ENDPOINT_STORE_DELETE: &str = "/internal/store/delete";
pub const ENDPOINT_STORE_PREFIX: &str = "/internal/store/prefix";
pub const ENDPOINT_LEASE_CREATE: &str = "/internal/store/lease/create";
pub const ENDPOINT_LEASE_KEEPALIVE: &str = "/internal/store/lease/keepalive";
pub const ENDPOINT_LEASE_REVOKE: &str = "/internal/store/lease/revoke";

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

/// Used by get, delete and prefix scans.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` when the key does not exist.
    pub value: Option<String>,
}

/// Acknowledges a put or a lease revocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefixResponse {
    pub entries: Vec<KeyValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseCreateRequest {
    pub key: String,
    pub value: String,
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseCreateResponse {
    /// `None` when the key is already held.
    pub lease: Option<LeaseId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub lease: LeaseId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeepAliveResponse {
    pub alive: bool,
}

/// Body returned with a non-2xx status.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoreErrorResponse {
    pub error: String,
}
