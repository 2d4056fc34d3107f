//! Remote client: the network boundary of the sync engine.
//!
//! - [`traits`]: the [`RemoteClient`] contract the engine consumes
//! - [`wire`]: JSON shapes and timestamp normalization
//! - [`http`]: reqwest implementation against the HTTP backend
//! - [`memory`]: in-process remote for tests, demos and offline development

pub mod traits;
pub mod wire;
pub mod http;
pub mod memory;

pub use traits::RemoteClient;
pub use wire::{ChangeSet, GoalDto};
pub use http::{HttpRemoteClient, HttpRemoteConfig};
pub use memory::InMemoryRemote;
