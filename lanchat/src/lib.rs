//! `LanChat`: peer-to-peer chat over a local network.
//!
//! One device hosts a TCP listener and relays every frame to all joined
//! clients; each device keeps its own message store in sync by applying
//! the relayed events through a single reconciler.

pub mod config;
pub mod files;
pub mod hub;
pub mod node;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod status;
pub mod store;
pub mod transport;

pub use node::{ChatNode, NetworkLock, NodeOptions, NoopLock};
