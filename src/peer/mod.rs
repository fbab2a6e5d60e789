//! Peer Management
//!
//! Cluster members, as far as the coordination core needs them: a stable id,
//! an address to send steps to, and the bootstrap operations run while a node
//! joins or leaves.
//!
//! ## Submodules
//! - **`types`**: `NodeId`, peer records and the bootstrap RPC messages.
//! - **`store`**: peer records in the replicated store; resolves node ids to addresses.
//! - **`service`**: add/delete validation and store membership reconfiguration.
//! - **`client`** / **`handlers`**: the bootstrap RPC over HTTP.

pub mod client;
pub mod handlers;
pub mod service;
pub mod store;
pub mod types;


pub use service::{LocalStoreMember, PeerService, StoreMember};
pub use store::PeerStore;
pub use types::{NodeId, PeerInfo};
