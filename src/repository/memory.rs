//! In-Memory Store Backends
//!
//! Document store, profile store and local store kept in process memory.
//! Used by tests and by embedders that wire their own network layer later;
//! the list store implements the same live-snapshot push a remote backend
//! would deliver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{DomainError, DomainResult, ListDetails, SharedList, TodoItem};

use super::traits::{
    Document, ListStore, ListSubscription, LocalStore, ProfileStore, Snapshot, StopHandle,
};

struct Watcher {
    id: u64,
    user_id: String,
    tx: mpsc::UnboundedSender<DomainResult<Snapshot>>,
}

/// In-memory `lists` collection with membership-filtered live snapshots.
///
/// Documents are stored as raw bodies so callers can seed malformed data
/// and exercise the lenient parse path. Writes can be made to fail on
/// demand to drive rollback behavior in tests.
pub struct MemoryListStore {
    docs: Mutex<Vec<(String, serde_json::Value)>>,
    watchers: Arc<Mutex<Vec<Watcher>>>,
    next_watcher_id: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(Vec::new()),
            watchers: Arc::new(Mutex::new(Vec::new())),
            next_watcher_id: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a raw document body directly, bypassing entity validation
    pub fn insert_raw(&self, id: &str, data: serde_json::Value) {
        self.docs.lock().unwrap().push((id.to_string(), data));
        self.notify();
    }

    fn check_write(&self) -> DomainResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::Remote("write rejected by store".to_string()));
        }
        Ok(())
    }

    fn member_ids(data: &serde_json::Value) -> Vec<String> {
        data.get("sharedUserIDs")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot_for(&self, user_id: &str) -> Snapshot {
        self.docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| Self::member_ids(data).iter().any(|m| m == user_id))
            .map(|(id, data)| Document { id: id.clone(), data: data.clone() })
            .collect()
    }

    /// Push the current result set to every live watcher, dropping dead ones
    fn notify(&self) {
        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|w| {
            let snapshot = self.snapshot_for(&w.user_id);
            w.tx.send(Ok(snapshot)).is_ok()
        });
    }

    fn with_doc<T>(
        &self,
        list_id: &str,
        f: impl FnOnce(&mut serde_json::Value) -> T,
    ) -> DomainResult<T> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .iter_mut()
            .find(|(id, _)| id == list_id)
            .map(|(_, data)| data)
            .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;
        Ok(f(doc))
    }
}

impl Default for MemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn create(&self, list: &SharedList) -> DomainResult<()> {
        self.check_write()?;
        let mut docs = self.docs.lock().unwrap();
        if docs.iter().any(|(id, _)| id == &list.id) {
            return Err(DomainError::Conflict(format!("list {} already exists", list.id)));
        }
        docs.push((list.id.clone(), list.to_document()));
        drop(docs);
        self.notify();
        Ok(())
    }

    async fn get(&self, list_id: &str) -> DomainResult<Option<SharedList>> {
        let docs = self.docs.lock().unwrap();
        match docs.iter().find(|(id, _)| id == list_id) {
            Some((id, data)) => SharedList::from_document(id, data.clone()).map(Some),
            None => Ok(None),
        }
    }

    async fn find_by_share_code(&self, code: &str) -> DomainResult<Option<SharedList>> {
        let docs = self.docs.lock().unwrap();
        for (id, data) in docs.iter() {
            if data.get("shareCode").and_then(|v| v.as_str()) == Some(code) {
                return SharedList::from_document(id, data.clone()).map(Some);
            }
        }
        Ok(None)
    }

    async fn lists_for_user(&self, user_id: &str) -> DomainResult<Snapshot> {
        Ok(self.snapshot_for(user_id))
    }

    async fn update_details(&self, list_id: &str, details: &ListDetails) -> DomainResult<()> {
        self.check_write()?;
        self.with_doc(list_id, |data| {
            if let Some(map) = data.as_object_mut() {
                map.insert("title".to_string(), serde_json::Value::String(details.title.clone()));
                match &details.subtitle {
                    Some(s) => {
                        map.insert("subtitle".to_string(), serde_json::Value::String(s.clone()));
                    }
                    None => {
                        map.remove("subtitle");
                    }
                }
                match &details.due_date {
                    Some(d) => {
                        map.insert(
                            "dueDate".to_string(),
                            serde_json::to_value(d).unwrap_or(serde_json::Value::Null),
                        );
                    }
                    None => {
                        map.remove("dueDate");
                    }
                }
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn push_todo(&self, list_id: &str, todo: &TodoItem) -> DomainResult<()> {
        self.check_write()?;
        let value = serde_json::to_value(todo)
            .map_err(|e| DomainError::Remote(e.to_string()))?;
        self.with_doc(list_id, |data| {
            let todos = data
                .as_object_mut()
                .map(|map| {
                    map.entry("todos".to_string())
                        .or_insert_with(|| serde_json::Value::Array(Vec::new()))
                })
                .and_then(|v| v.as_array_mut());
            if let Some(todos) = todos {
                // union: an identical element is not appended twice
                if !todos.contains(&value) {
                    todos.push(value);
                }
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn replace_todos(&self, list_id: &str, todos: &[TodoItem]) -> DomainResult<()> {
        self.check_write()?;
        let value = serde_json::to_value(todos)
            .map_err(|e| DomainError::Remote(e.to_string()))?;
        self.with_doc(list_id, |data| {
            if let Some(map) = data.as_object_mut() {
                map.insert("todos".to_string(), value);
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn add_member(&self, list_id: &str, user_id: &str) -> DomainResult<()> {
        self.check_write()?;
        let value = serde_json::Value::String(user_id.to_string());
        self.with_doc(list_id, |data| {
            let members = data
                .as_object_mut()
                .map(|map| {
                    map.entry("sharedUserIDs".to_string())
                        .or_insert_with(|| serde_json::Value::Array(Vec::new()))
                })
                .and_then(|v| v.as_array_mut());
            if let Some(members) = members {
                if !members.contains(&value) {
                    members.push(value);
                }
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn set_members(&self, list_id: &str, member_ids: &[String]) -> DomainResult<()> {
        self.check_write()?;
        let value = serde_json::to_value(member_ids)
            .map_err(|e| DomainError::Remote(e.to_string()))?;
        self.with_doc(list_id, |data| {
            if let Some(map) = data.as_object_mut() {
                map.insert("sharedUserIDs".to_string(), value);
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn remove_member(&self, list_id: &str, user_id: &str) -> DomainResult<()> {
        self.check_write()?;
        self.with_doc(list_id, |data| {
            if let Some(members) = data.get_mut("sharedUserIDs").and_then(|v| v.as_array_mut()) {
                members.retain(|v| v.as_str() != Some(user_id));
            }
        })?;
        self.notify();
        Ok(())
    }

    async fn delete(&self, list_id: &str) -> DomainResult<()> {
        self.check_write()?;
        self.docs.lock().unwrap().retain(|(id, _)| id != list_id);
        self.notify();
        Ok(())
    }

    async fn watch(&self, user_id: &str) -> ListSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        // current result set first, then every change
        let _ = tx.send(Ok(self.snapshot_for(user_id)));
        self.watchers.lock().unwrap().push(Watcher {
            id,
            user_id: user_id.to_string(),
            tx,
        });

        let watchers = Arc::clone(&self.watchers);
        let stop = StopHandle::new(move || {
            watchers.lock().unwrap().retain(|w| w.id != id);
        });
        ListSubscription::new(rx, stop)
    }
}

/// In-memory `userProfiles` collection
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, String>>,
    batch_queries: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
            batch_queries: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, user_id: &str, nickname: &str) {
        self.profiles
            .lock()
            .unwrap()
            .insert(user_id.to_string(), nickname.to_string());
    }

    /// Number of batched queries issued so far
    pub fn batch_queries(&self) -> usize {
        self.batch_queries.load(Ordering::SeqCst)
    }

    /// Make the next `n` batched queries fail
    pub fn fail_next_batches(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound of the store's "id in set" predicate
pub const MAX_IN_QUERY: usize = 10;

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn nickname(&self, user_id: &str) -> DomainResult<Option<String>> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn set_nickname(&self, user_id: &str, nickname: &str) -> DomainResult<()> {
        self.insert(user_id, nickname);
        Ok(())
    }

    async fn nicknames(&self, user_ids: &[String]) -> DomainResult<HashMap<String, String>> {
        if user_ids.len() > MAX_IN_QUERY {
            return Err(DomainError::Remote(format!(
                "'in' query supports at most {} values, got {}",
                MAX_IN_QUERY,
                user_ids.len()
            )));
        }
        self.batch_queries.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DomainError::Remote("profile query failed".to_string()));
        }
        let profiles = self.profiles.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| profiles.get(id).map(|n| (id.clone(), n.clone())))
            .collect())
    }
}

/// In-memory key-value store, the volatile stand-in for device storage
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()) }
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> DomainResult<Option<serde_json::Value>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> DomainResult<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> DomainResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
