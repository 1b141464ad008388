//! Shared List Client Engine
//!
//! Layered architecture:
//! - domain: Core entities and business rules
//! - repository: Boundary traits and store backends
//! - session: Observable view-models (live sync, ordering, mutations)
//!
//! A UI binds to [`ListSession`] for the shared lists themselves and to
//! [`ProfileSession`] for the signed-in user's nickname. The remote
//! document store, profile store and device-local storage are injected
//! behind the [`repository`] traits, so the engine runs unchanged against
//! the bundled in-memory backends or a real network client.

pub mod domain;
pub mod repository;
pub mod session;

pub use domain::{DomainError, DomainResult, ListDetails, SharedList, TodoItem};
pub use repository::{ListStore, LocalStore, ProfileStore};
pub use session::{ListSession, ProfileSession};
