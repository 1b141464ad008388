//! Repository Layer - Core Traits
//!
//! Abstract interfaces over the remote document store, the profile store
//! and durable local key-value storage. Implementations can be in-memory,
//! SQLite, or a real network backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{DomainResult, ListDetails, SharedList, TodoItem};

/// A raw document as delivered by the store: key plus untyped body.
///
/// Parsing into [`SharedList`] happens at the session layer so that one
/// malformed document never poisons a whole snapshot.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: serde_json::Value,
}

/// A full result-set snapshot for one watched query
pub type Snapshot = Vec<Document>;

/// Cancels a live subscription. Cloneable so the consuming task and its
/// owner can both hold one; calling it twice is harmless.
#[derive(Clone)]
pub struct StopHandle(Arc<dyn Fn() + Send + Sync>);

impl StopHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(cancel))
    }

    pub fn stop(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StopHandle")
    }
}

/// Live subscription to a membership query.
///
/// The store pushes the full matching result set on every relevant change,
/// and an error item when the query itself fails. There is no implicit
/// cancellation: dropping the subscription without [`ListSubscription::stop`]
/// (or its [`StopHandle`]) leaves the watcher registered on the store side.
pub struct ListSubscription {
    rx: mpsc::UnboundedReceiver<DomainResult<Snapshot>>,
    stop: StopHandle,
}

impl ListSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<DomainResult<Snapshot>>, stop: StopHandle) -> Self {
        Self { rx, stop }
    }

    /// Next snapshot, or `None` once the store side has gone away
    pub async fn recv(&mut self) -> Option<DomainResult<Snapshot>> {
        self.rx.recv().await
    }

    /// Handle for tearing the subscription down from outside the consumer
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Tear the subscription down explicitly
    pub fn stop(self) {
        self.stop.stop();
    }
}

/// Remote document store holding the `lists` collection.
///
/// Three write shapes exist on purpose: single-field updates
/// ([`update_details`](ListStore::update_details)), additive array-union
/// ([`push_todo`](ListStore::push_todo), [`add_member`](ListStore::add_member))
/// and whole-array replacement ([`replace_todos`](ListStore::replace_todos),
/// [`set_members`](ListStore::set_members)). A backend with element-level
/// array mutations may implement the whole-array calls natively as long as
/// the observable result is the same.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Create a new list document under `list.id`
    async fn create(&self, list: &SharedList) -> DomainResult<()>;

    /// Point read of one list
    async fn get(&self, list_id: &str) -> DomainResult<Option<SharedList>>;

    /// One-shot lookup of the unique list carrying `code`
    async fn find_by_share_code(&self, code: &str) -> DomainResult<Option<SharedList>>;

    /// One-shot membership query, raw documents
    async fn lists_for_user(&self, user_id: &str) -> DomainResult<Snapshot>;

    /// Update the header fields; cleared optionals delete the field
    async fn update_details(&self, list_id: &str, details: &ListDetails) -> DomainResult<()>;

    /// Append one todo via additive array-union
    async fn push_todo(&self, list_id: &str, todo: &TodoItem) -> DomainResult<()>;

    /// Replace the whole todo array (edits, reorders, deletions)
    async fn replace_todos(&self, list_id: &str, todos: &[TodoItem]) -> DomainResult<()>;

    /// Add one member via additive array-union
    async fn add_member(&self, list_id: &str, user_id: &str) -> DomainResult<()>;

    /// Replace the whole membership array
    async fn set_members(&self, list_id: &str, member_ids: &[String]) -> DomainResult<()>;

    /// Remove one member via array-remove
    async fn remove_member(&self, list_id: &str, user_id: &str) -> DomainResult<()>;

    /// Delete the document outright
    async fn delete(&self, list_id: &str) -> DomainResult<()>;

    /// Subscribe to the membership query for `user_id`.
    ///
    /// The current result set is pushed immediately, then again on every
    /// matching change until the subscription is stopped.
    async fn watch(&self, user_id: &str) -> ListSubscription;
}

/// Store for the `userProfiles` collection (user id -> nickname)
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Point read of one profile's nickname
    async fn nickname(&self, user_id: &str) -> DomainResult<Option<String>>;

    /// Merge-write one profile's nickname
    async fn set_nickname(&self, user_id: &str, nickname: &str) -> DomainResult<()>;

    /// Batched "id in set" query. Backends bound the batch size (10);
    /// callers chunk accordingly.
    async fn nicknames(&self, user_ids: &[String]) -> DomainResult<HashMap<String, String>>;
}

/// Durable device-local key-value storage, JSON values by string key.
///
/// Holds per-user presentation state such as the display order
/// (`listOrder_<userID>`); opaque to the remote store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> DomainResult<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> DomainResult<()>;
    async fn remove(&self, key: &str) -> DomainResult<()>;
}
