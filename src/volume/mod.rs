//! Volumes
//!
//! A volume is a named set of bricks (directories) spread over cluster nodes.
//! Creating one is the canonical distributed transaction: every node hosting
//! a brick validates it, writes its volfiles, and the volume is recorded in
//! the replicated store, or all of it is undone.
//!
//! ## Submodules
//! - **`types`**: request and entity types, brick string parsing.
//! - **`store`**: volume entries under `clusterd/volumes/`.
//! - **`steps`**: the `vol-create.*` step set registered on every node.
//! - **`create`**: resolves the nodes of a request and drives the transaction.
//! - **`handlers`**: the `POST /v1/volumes` endpoint.

pub mod create;
pub mod handlers;
pub mod steps;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use create::create_volume;
pub use handlers::volume_routes;
pub use steps::{VolumeSteps, register_vol_create_steps};
pub use store::VolumeStore;
pub use types::{Brickinfo, VolAuth, VolCreateRequest, VolCreateResponse, Volinfo};
