//! Local persistence: the record store, the cursor slot, and the outbox.

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{CursorStore, GoalStore, LocalStore, OutboxStore, StorageError};
pub use memory::InMemoryStore;
pub use sql::SqlStore;
