//! Execution Context
//!
//! Key/value state carried through every phase of a transaction and across
//! every node, plus the request-scoped logger and a handle to the store.
//!
//! Values are held as `serde_json::Value` so that what a local step sees is
//! exactly what a remote node would reconstruct from a snapshot. Remote writes
//! never mutate this object; they come back as a [`CtxFragment`] which the
//! orchestrator merges explicitly.

use super::protocol::{CtxFragment, CtxSnapshot};
use super::types::TxnId;
use crate::error::{TxnError, TxnResult};
use crate::store::SharedStore;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TxnCtx {
    inner: Arc<CtxInner>,
}

struct CtxInner {
    reqid: String,
    txn_id: TxnId,
    log_fields: BTreeMap<String, String>,
    data: DashMap<String, Value>,
    span: tracing::Span,
    store: SharedStore,
}

impl TxnCtx {
    pub fn new(reqid: impl Into<String>, store: SharedStore) -> Self {
        Self::with_log_fields(reqid, BTreeMap::new(), store)
    }

    pub fn with_log_fields(
        reqid: impl Into<String>,
        log_fields: BTreeMap<String, String>,
        store: SharedStore,
    ) -> Self {
        Self::build(reqid.into(), TxnId::new(), log_fields, DashMap::new(), store)
    }

    /// Reconstructs a context received from another node.
    pub fn from_snapshot(snapshot: CtxSnapshot, store: SharedStore) -> Self {
        Self::build(
            snapshot.reqid,
            snapshot.txn_id,
            snapshot.log_fields,
            snapshot.data.into_iter().collect(),
            store,
        )
    }

    fn build(
        reqid: String,
        txn_id: TxnId,
        log_fields: BTreeMap<String, String>,
        data: DashMap<String, Value>,
        store: SharedStore,
    ) -> Self {
        let span = if log_fields.is_empty() {
            tracing::info_span!("txn", reqid = %reqid, txn_id = %txn_id)
        } else {
            tracing::info_span!("txn", reqid = %reqid, txn_id = %txn_id, fields = ?log_fields)
        };

        Self {
            inner: Arc::new(CtxInner {
                reqid,
                txn_id,
                log_fields,
                data,
                span,
                store,
            }),
        }
    }

    pub fn reqid(&self) -> &str {
        &self.inner.reqid
    }

    pub fn txn_id(&self) -> TxnId {
        self.inner.txn_id
    }

    /// Span every log line of the transaction should be emitted under.
    pub fn logger(&self) -> &tracing::Span {
        &self.inner.span
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> TxnResult<()> {
        let encoded = serde_json::to_value(value).map_err(|e| TxnError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.inner.data.insert(key.to_string(), encoded);
        Ok(())
    }

    /// Reads `key` back into the caller's type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> TxnResult<T> {
        let value = self
            .inner
            .data
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TxnError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value).map_err(|e| TxnError::Deserialization {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.data.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> CtxSnapshot {
        CtxSnapshot {
            reqid: self.inner.reqid.clone(),
            txn_id: self.inner.txn_id,
            log_fields: self.inner.log_fields.clone(),
            data: self
                .inner
                .data
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    /// Keys whose current value is new or differs from `base`.
    pub fn fragment_since(&self, base: &CtxSnapshot) -> CtxFragment {
        let changes = self
            .inner
            .data
            .iter()
            .filter(|entry| base.data.get(entry.key()) != Some(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        CtxFragment { changes }
    }

    /// Applies a fragment returned by a node. Later merges win on the same key.
    pub fn merge(&self, fragment: CtxFragment) {
        for (key, value) in fragment.changes {
            self.inner.data.insert(key, value);
        }
    }
}

impl std::fmt::Debug for TxnCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnCtx")
            .field("reqid", &self.inner.reqid)
            .field("txn_id", &self.inner.txn_id)
            .field("keys", &self.keys())
            .finish()
    }
}
