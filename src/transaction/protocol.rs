//! Wire format of the step invocation RPC.
//!
//! A node asks a peer to run one named step against a snapshot of the
//! transaction context; the peer answers with the keys the step changed.

use super::types::TxnId;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const ENDPOINT_TXN_STEP: &str = "/internal/txn/step";

/// Flattened execution context as it crosses a node boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CtxSnapshot {
    pub reqid: String,
    pub txn_id: TxnId,
    /// Request scoped logging fields, re-attached by the receiving node.
    #[serde(default)]
    pub log_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

/// Keys a step wrote whose value differs from the snapshot it was sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CtxFragment {
    #[serde(default)]
    pub changes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub step: String,
    pub ctx: CtxSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub ok: bool,
    pub error: Option<String>,
    pub fragment: Option<CtxFragment>,
}

impl StepResponse {
    pub fn success(fragment: CtxFragment) -> Self {
        Self {
            ok: true,
            error: None,
            fragment: Some(fragment),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            fragment: None,
        }
    }
}
