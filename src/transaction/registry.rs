//! Step Registry
//!
//! Maps step names (e.g. "vol-create.Stage") to the async functions that
//! implement them. The registry is assembled once through a
//! [`StepRegistryBuilder`] during startup and frozen into an `Arc<StepRegistry>`,
//! so concurrent lookups from overlapping transactions need no locking.

use super::context::TxnCtx;
use crate::error::{TxnError, TxnResult};

use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type alias for a thread-safe, asynchronous step function.
/// It takes the node-local copy of the context and resolves to success or failure.
pub type StepFn =
    Arc<dyn Fn(TxnCtx) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Read-only table of registered steps.
pub struct StepRegistry {
    steps: HashMap<String, StepFn>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Looks up a step by name.
    pub fn lookup(&self, name: &str) -> TxnResult<StepFn> {
        self.steps
            .get(name)
            .cloned()
            .ok_or_else(|| TxnError::Registry(format!("unknown step: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Collects step registrations before the registry is frozen.
#[derive(Default)]
pub struct StepRegistryBuilder {
    steps: HashMap<String, StepFn>,
}

impl StepRegistryBuilder {
    /// Registers a step function under `name`.
    ///
    /// # Errors
    /// Fails with `Registry` if `name` is already taken.
    pub fn register<F, Fut>(&mut self, name: &str, step: F) -> TxnResult<&mut Self>
    where
        F: Fn(TxnCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.steps.contains_key(name) {
            return Err(TxnError::Registry(format!(
                "step {} is already registered",
                name
            )));
        }

        // Box the future so steps with different future types share one map
        let step_fn: StepFn = Arc::new(move |ctx: TxnCtx| {
            Box::pin(step(ctx)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });
        self.steps.insert(name.to_string(), step_fn);

        tracing::debug!("Registered step: {}", name);
        Ok(self)
    }

    pub fn build(self) -> Arc<StepRegistry> {
        tracing::info!("Step registry ready with {} steps", self.steps.len());
        Arc::new(StepRegistry { steps: self.steps })
    }
}
