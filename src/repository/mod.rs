//! Repository Layer
//!
//! Boundary traits for the remote document store, the profile store and
//! durable local storage, plus the bundled backends.

mod local;
mod memory;
mod traits;


pub use local::SqliteLocalStore;
pub use memory::{MemoryListStore, MemoryLocalStore, MemoryProfileStore, MAX_IN_QUERY};
pub use traits::{
    Document, ListStore, ListSubscription, LocalStore, ProfileStore, Snapshot, StopHandle,
};
