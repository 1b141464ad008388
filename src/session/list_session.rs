//! List Session
//!
//! The observable view-model behind the main list screen: watches the
//! remote store, merges snapshots with the locally saved display order,
//! and runs every list/todo mutation optimistically with rollback.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::warn;
use tokio::sync::{watch, Mutex};

use crate::domain::{
    share_code, DomainError, DomainResult, ListDetails, SharedList, TodoItem,
};
use crate::repository::{ListStore, LocalStore, ProfileStore, Snapshot, StopHandle};

use super::nickname::NicknameResolver;
use super::order::{order_key, reconcile, REORDER_SETTLE_DELAY};

/// Attempts at drawing an unused invite code before giving up
const SHARE_CODE_ATTEMPTS: usize = 5;

#[derive(Default)]
struct SessionState {
    /// Lists in display order; what the screen renders
    lists: Vec<SharedList>,
    /// In-memory copy of the saved display order
    order_cache: Option<Vec<String>>,
    /// Inbound snapshots are dropped while a reorder is in flight
    reordering: bool,
    /// Bumped on every begin/commit; stale settle timers must not clear the flag
    reorder_epoch: u64,
    is_loading: bool,
    /// Last failure on a path with no caller to return to (snapshot handling)
    last_error: Option<DomainError>,
    listener: Option<StopHandle>,
}

struct Inner {
    user_id: String,
    store: Arc<dyn ListStore>,
    local: Arc<dyn LocalStore>,
    nicknames: NicknameResolver,
    state: Mutex<SessionState>,
    changed: watch::Sender<u64>,
}

/// Per-user session over the shared lists.
///
/// All state mutation funnels through one mutex-guarded struct, so mutators
/// and the snapshot handler never interleave mid-update. Clones share the
/// same session.
#[derive(Clone)]
pub struct ListSession {
    inner: Arc<Inner>,
}

impl ListSession {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn ListStore>,
        local: Arc<dyn LocalStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                user_id: user_id.into(),
                store,
                local,
                nicknames: NicknameResolver::new(profiles),
                state: Mutex::new(SessionState::default()),
                changed,
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Current lists in display order
    pub async fn lists(&self) -> Vec<SharedList> {
        self.inner.state.lock().await.lists.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.lock().await.is_loading
    }

    /// Last error recorded on the snapshot path, if any
    pub async fn last_error(&self) -> Option<DomainError> {
        self.inner.state.lock().await.last_error.clone()
    }

    /// Cached nickname for a member id
    pub fn display_name(&self, user_id: &str) -> Option<String> {
        self.inner.nicknames.display_name(user_id)
    }

    /// Resolve nicknames for arbitrary member ids (batched, cached)
    pub async fn ensure_nicknames(&self, user_ids: &[String]) {
        self.inner.nicknames.ensure_nicknames(user_ids).await;
    }

    /// Change signal for the embedding UI; the value is a bare generation
    /// counter, bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    fn notify(&self) {
        self.inner.changed.send_modify(|generation| *generation += 1);
    }

    // ── Live observation ─────────────────────────────────────────────────

    /// Start (or restart) watching the user's lists.
    ///
    /// Replaces any previous subscription. Snapshots are applied on the
    /// session's serialized context until [`stop_observing`] is called.
    ///
    /// [`stop_observing`]: ListSession::stop_observing
    pub async fn observe(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(listener) = state.listener.take() {
            listener.stop();
        }

        if self.inner.user_id.is_empty() {
            state.lists.clear();
            drop(state);
            self.notify();
            return;
        }

        if state.order_cache.is_none() {
            state.order_cache = self.load_order().await;
        }
        state.is_loading = true;
        drop(state);
        self.notify();

        let mut sub = self.inner.store.watch(&self.inner.user_id).await;
        let stop = sub.stop_handle();
        self.inner.state.lock().await.listener = Some(stop);

        let session = self.clone();
        tokio::spawn(async move {
            while let Some(result) = sub.recv().await {
                match result {
                    Ok(snapshot) => session.apply_snapshot(snapshot).await,
                    Err(e) => {
                        warn!("list subscription failed: {}", e);
                        let mut state = session.inner.state.lock().await;
                        state.last_error = Some(e);
                        state.is_loading = false;
                        drop(state);
                        session.notify();
                    }
                }
            }
        });
    }

    /// Tear the subscription down. Without this the watcher keeps pushing
    /// snapshots for the lifetime of the store.
    pub async fn stop_observing(&self) {
        if let Some(listener) = self.inner.state.lock().await.listener.take() {
            listener.stop();
        }
    }

    async fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.inner.state.lock().await;
        // a reorder is in flight; applying the snapshot now would snap the
        // rows back to their pre-drag positions
        if state.reordering {
            return;
        }

        let mut live = Vec::with_capacity(snapshot.len());
        for doc in snapshot {
            match SharedList::from_document(&doc.id, doc.data) {
                Ok(list) => live.push(list),
                Err(e) => warn!("skipping list document: {}", e),
            }
        }

        let cached = match &state.order_cache {
            Some(order) => order.clone(),
            None => self.load_order().await.unwrap_or_default(),
        };
        let out = reconcile(live, &cached);

        let member_ids: Vec<String> = out
            .lists
            .iter()
            .flat_map(|l| l.shared_user_ids.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        state.lists = out.lists;
        state.is_loading = false;
        state.last_error = None;
        if out.order_changed {
            if let Err(e) = self.save_order(&out.order).await {
                warn!("failed to persist pruned display order: {}", e);
            }
            state.order_cache = Some(out.order);
        } else if state.order_cache.is_none() {
            state.order_cache = Some(out.order);
        }
        drop(state);
        self.notify();

        if !member_ids.is_empty() {
            self.inner.nicknames.ensure_nicknames(&member_ids).await;
        }
    }

    // ── Reorder session ──────────────────────────────────────────────────

    /// Mark a reorder gesture as started. Must run before the display order
    /// is touched; from here until the settle delay after
    /// [`commit_reorder`](ListSession::commit_reorder), inbound snapshots
    /// are ignored.
    pub async fn begin_reorder(&self) {
        let mut state = self.inner.state.lock().await;
        state.reordering = true;
        state.reorder_epoch += 1;
    }

    /// Commit the order the user dropped the rows into.
    ///
    /// Applies to presentation and the in-memory cache immediately, persists
    /// durably, then lifts snapshot suppression after the settle delay. A
    /// re-armed session (another begin before the delay elapses) keeps the
    /// flag; the latest commit wins.
    pub async fn commit_reorder(&self, new_order: Vec<String>) -> DomainResult<()> {
        let mut state = self.inner.state.lock().await;
        state.lists.sort_by_key(|list| {
            new_order
                .iter()
                .position(|id| id == &list.id)
                .unwrap_or(usize::MAX)
        });
        state.order_cache = Some(new_order.clone());
        state.reorder_epoch += 1;
        let epoch = state.reorder_epoch;
        let persisted = self.save_order(&new_order).await;
        drop(state);
        self.notify();

        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REORDER_SETTLE_DELAY).await;
            let mut state = session.inner.state.lock().await;
            if state.reorder_epoch == epoch {
                state.reordering = false;
            }
        });

        persisted
    }

    // ── List mutations ───────────────────────────────────────────────────

    /// Create a list owned by the session user; the live snapshot delivers
    /// it (no local insert, which would double it up once the echo lands).
    /// Returns the new list id.
    pub async fn create_list(
        &self,
        title: &str,
        subtitle: Option<String>,
        due_date: Option<DateTime<Utc>>,
    ) -> DomainResult<String> {
        if self.inner.user_id.is_empty() {
            return Err(DomainError::InvalidInput("no signed-in user".to_string()));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::InvalidInput("title must not be empty".to_string()));
        }

        self.set_loading(true).await;
        let result = self.create_list_inner(title, subtitle, due_date).await;
        self.set_loading(false).await;
        if let Err(e) = &result {
            self.record_error(e.clone()).await;
        }
        result
    }

    async fn create_list_inner(
        &self,
        title: &str,
        subtitle: Option<String>,
        due_date: Option<DateTime<Utc>>,
    ) -> DomainResult<String> {
        let mut code = None;
        for _ in 0..SHARE_CODE_ATTEMPTS {
            let candidate = share_code::generate();
            match self.inner.store.find_by_share_code(&candidate).await {
                Ok(None) => {
                    code = Some(candidate);
                    break;
                }
                Ok(Some(_)) => continue,
                Err(e) => warn!("share code availability check failed: {}", e),
            }
        }
        let code = code.ok_or_else(|| {
            DomainError::Remote("could not allocate an unused share code".to_string())
        })?;

        let mut list = SharedList::new(title, code, self.inner.user_id.clone());
        list.subtitle = subtitle;
        list.due_date = due_date;
        self.inner.store.create(&list).await?;
        Ok(list.id)
    }

    /// Update a list's header fields; cleared optionals are removed from
    /// the remote document.
    pub async fn update_list(
        &self,
        list_id: &str,
        title: &str,
        subtitle: Option<String>,
        due_date: Option<DateTime<Utc>>,
    ) -> DomainResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::InvalidInput("title must not be empty".to_string()));
        }
        let details = ListDetails {
            title: title.to_string(),
            subtitle,
            due_date,
        };

        let prior = self
            .edit_list(list_id, |list| {
                let prior = (list.title.clone(), list.subtitle.clone(), list.due_date);
                list.title = details.title.clone();
                list.subtitle = details.subtitle.clone();
                list.due_date = details.due_date;
                prior
            })
            .await;
        if prior.is_some() {
            self.notify();
        }

        match self.inner.store.update_details(list_id, &details).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some((title, subtitle, due_date)) = prior {
                    self.edit_list(list_id, |list| {
                        list.title = title;
                        list.subtitle = subtitle;
                        list.due_date = due_date;
                    })
                    .await;
                }
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Complete a list: an explicit terminal action, deleting the document
    /// for every member regardless of membership.
    pub async fn complete_list(&self, list_id: &str) -> DomainResult<()> {
        match self.inner.store.delete(list_id).await {
            Err(e) => {
                self.record_error(e.clone()).await;
                Err(e)
            }
            Ok(()) => {
                let mut state = self.inner.state.lock().await;
                state.lists.retain(|l| l.id != list_id);
                self.prune_order(&mut state, &[list_id.to_string()]).await;
                drop(state);
                self.notify();
                Ok(())
            }
        }
    }

    /// Remove the session user from each of `list_ids`, best-effort.
    ///
    /// A list whose membership would become empty is deleted outright —
    /// no document may outlive its last member. Per-list failures are
    /// logged; the remaining lists still run.
    pub async fn leave_lists(&self, list_ids: &[String]) {
        if self.inner.user_id.is_empty() || list_ids.is_empty() {
            return;
        }
        self.set_loading(true).await;

        let tasks = list_ids.iter().map(|list_id| {
            let store = Arc::clone(&self.inner.store);
            let user_id = self.inner.user_id.clone();
            let list_id = list_id.clone();
            async move {
                if let Err(e) = leave_one(store.as_ref(), &list_id, &user_id).await {
                    warn!("failed to leave list {}: {}", list_id, e);
                }
            }
        });
        join_all(tasks).await;

        let mut state = self.inner.state.lock().await;
        state.lists.retain(|l| !list_ids.contains(&l.id));
        self.prune_order(&mut state, list_ids).await;
        state.is_loading = false;
        state.last_error = None;
        drop(state);
        self.notify();
    }

    /// Join a list by invite code. Rejects an unknown code and a caller who
    /// is already a member; on success the membership write is an additive
    /// union, so a concurrent join cannot duplicate the entry. Returns the
    /// joined list id.
    pub async fn join_list(&self, code: &str) -> DomainResult<String> {
        if self.inner.user_id.is_empty() {
            return Err(DomainError::InvalidInput("no signed-in user".to_string()));
        }

        self.set_loading(true).await;
        let result = self.join_list_inner(code).await;
        self.set_loading(false).await;
        if let Err(e) = &result {
            self.record_error(e.clone()).await;
        }
        result
    }

    async fn join_list_inner(&self, code: &str) -> DomainResult<String> {
        let list = self
            .inner
            .store
            .find_by_share_code(code)
            .await?
            .ok_or_else(|| DomainError::NotFound("no list matches that invite code".to_string()))?;

        let already_local = {
            let state = self.inner.state.lock().await;
            state.lists.iter().any(|l| l.id == list.id)
        };
        if already_local || list.is_member(&self.inner.user_id) {
            return Err(DomainError::Conflict("already a member of this list".to_string()));
        }

        self.inner.store.add_member(&list.id, &self.inner.user_id).await?;
        Ok(list.id)
    }

    /// Scrub the user from every list they are a member of and wipe local
    /// state (account deletion). Remote removals are best-effort per list;
    /// local teardown happens regardless.
    pub async fn delete_all_data(&self) {
        // observation ends first, so the scrub's own snapshot echoes cannot
        // resurrect state that is being wiped
        self.stop_observing().await;

        let user_id = self.inner.user_id.clone();
        if !user_id.is_empty() {
            match self.inner.store.lists_for_user(&user_id).await {
                Ok(snapshot) => {
                    let tasks = snapshot.into_iter().map(|doc| {
                        let store = Arc::clone(&self.inner.store);
                        let user_id = user_id.clone();
                        async move {
                            let result = match SharedList::from_document(&doc.id, doc.data) {
                                Ok(list) if list.shared_user_ids == [user_id.clone()] => {
                                    store.delete(&doc.id).await
                                }
                                Ok(_) => store.remove_member(&doc.id, &user_id).await,
                                // unreadable body: still try the blind array-remove
                                Err(_) => store.remove_member(&doc.id, &user_id).await,
                            };
                            if let Err(e) = result {
                                warn!("failed to remove user from list {}: {}", doc.id, e);
                            }
                        }
                    });
                    join_all(tasks).await;
                }
                Err(e) => warn!("membership query failed during account deletion: {}", e),
            }
        }

        let mut state = self.inner.state.lock().await;
        state.lists.clear();
        state.order_cache = None;
        state.is_loading = false;
        state.last_error = None;
        drop(state);

        if !user_id.is_empty() {
            if let Err(e) = self.inner.local.remove(&order_key(&user_id)).await {
                warn!("failed to clear saved display order: {}", e);
            }
        }
        self.inner.nicknames.clear();
        self.notify();
    }

    // ── Todo mutations ───────────────────────────────────────────────────

    /// Append one todo; the remote write is an additive union, safe under
    /// concurrent writers.
    pub async fn add_todo(&self, list_id: &str, todo: TodoItem) -> DomainResult<()> {
        if todo.title.trim().is_empty() {
            return Err(DomainError::InvalidInput("todo title must not be empty".to_string()));
        }

        let inserted = self
            .edit_list(list_id, |list| list.todos.push(todo.clone()))
            .await;
        if inserted.is_none() {
            return Err(DomainError::NotFound(format!("list {} not found", list_id)));
        }
        self.notify();

        match self.inner.store.push_todo(list_id, &todo).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.edit_list(list_id, |list| list.todos.retain(|t| t.id != todo.id))
                    .await;
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Edit one todo's fields. The remote store has no element-level array
    /// update, so the whole todo array is rewritten.
    pub async fn update_todo(
        &self,
        list_id: &str,
        todo_id: &str,
        title: &str,
        subtitle: Option<String>,
        due_date: Option<DateTime<Utc>>,
    ) -> DomainResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::InvalidInput("todo title must not be empty".to_string()));
        }

        let (prior, todos) = {
            let mut state = self.inner.state.lock().await;
            let list = state
                .lists
                .iter_mut()
                .find(|l| l.id == list_id)
                .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;
            let todo = list
                .todos
                .iter_mut()
                .find(|t| t.id == todo_id)
                .ok_or_else(|| DomainError::NotFound(format!("todo {} not found", todo_id)))?;
            let prior = todo.clone();
            todo.title = title.to_string();
            todo.subtitle = subtitle;
            todo.due_date = due_date;
            (prior, list.todos.clone())
        };
        self.notify();

        match self.inner.store.replace_todos(list_id, &todos).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.restore_todo(list_id, prior).await;
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Persist a new order for a list's todos (whole-array rewrite)
    pub async fn update_todo_order(
        &self,
        list_id: &str,
        todos: Vec<TodoItem>,
    ) -> DomainResult<()> {
        let prior = self
            .edit_list(list_id, |list| {
                std::mem::replace(&mut list.todos, todos.clone())
            })
            .await
            .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;
        self.notify();

        match self.inner.store.replace_todos(list_id, &todos).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.edit_list(list_id, |list| list.todos = prior).await;
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Delete the given todos from a list (whole-array rewrite)
    pub async fn delete_todos(&self, list_id: &str, todo_ids: &[String]) -> DomainResult<()> {
        let (prior, remaining) = {
            let mut state = self.inner.state.lock().await;
            let list = state
                .lists
                .iter_mut()
                .find(|l| l.id == list_id)
                .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;
            let prior = list.todos.clone();
            list.todos.retain(|t| !todo_ids.contains(&t.id));
            (prior, list.todos.clone())
        };
        self.notify();

        match self.inner.store.replace_todos(list_id, &remaining).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.edit_list(list_id, |list| list.todos = prior).await;
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    /// Flip one todo's completion flag, reverting on a failed write
    pub async fn toggle_todo(&self, list_id: &str, todo_id: &str) -> DomainResult<()> {
        let (prior, todos) = {
            let mut state = self.inner.state.lock().await;
            let list = state
                .lists
                .iter_mut()
                .find(|l| l.id == list_id)
                .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;
            let todo = list
                .todos
                .iter_mut()
                .find(|t| t.id == todo_id)
                .ok_or_else(|| DomainError::NotFound(format!("todo {} not found", todo_id)))?;
            let prior = todo.is_completed;
            todo.is_completed = !prior;
            (prior, list.todos.clone())
        };
        self.notify();

        match self.inner.store.replace_todos(list_id, &todos).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.edit_list(list_id, |list| {
                    if let Some(todo) = list.todos.iter_mut().find(|t| t.id == todo_id) {
                        todo.is_completed = prior;
                    }
                })
                .await;
                self.record_error(e.clone()).await;
                Err(e)
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Run `apply` against the local copy of a list, if there is one
    async fn edit_list<T>(
        &self,
        list_id: &str,
        apply: impl FnOnce(&mut SharedList) -> T,
    ) -> Option<T> {
        let mut state = self.inner.state.lock().await;
        state
            .lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .map(apply)
    }

    async fn restore_todo(&self, list_id: &str, prior: TodoItem) {
        self.edit_list(list_id, |list| {
            if let Some(todo) = list.todos.iter_mut().find(|t| t.id == prior.id) {
                *todo = prior;
            }
        })
        .await;
    }

    async fn set_loading(&self, loading: bool) {
        self.inner.state.lock().await.is_loading = loading;
        self.notify();
    }

    async fn record_error(&self, error: DomainError) {
        self.inner.state.lock().await.last_error = Some(error);
        self.notify();
    }

    async fn load_order(&self) -> Option<Vec<String>> {
        match self.inner.local.get(&order_key(&self.inner.user_id)).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(order) => Some(order),
                Err(e) => {
                    warn!("saved display order is unreadable: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("failed to load saved display order: {}", e);
                None
            }
        }
    }

    async fn save_order(&self, order: &[String]) -> DomainResult<()> {
        self.inner
            .local
            .set(&order_key(&self.inner.user_id), serde_json::json!(order))
            .await
    }

    /// Drop `removed` ids from the in-memory cache and the saved order
    async fn prune_order(&self, state: &mut SessionState, removed: &[String]) {
        if let Some(cache) = state.order_cache.as_mut() {
            cache.retain(|id| !removed.contains(id));
        }
        if let Some(current) = self.load_order().await {
            let updated: Vec<String> = current
                .into_iter()
                .filter(|id| !removed.contains(id))
                .collect();
            if let Err(e) = self.save_order(&updated).await {
                warn!("failed to update saved display order: {}", e);
            }
        }
    }
}

/// Remove `user_id` from one list, deleting the list when it was the last
/// member left.
async fn leave_one(store: &dyn ListStore, list_id: &str, user_id: &str) -> DomainResult<()> {
    let list = store
        .get(list_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("list {} not found", list_id)))?;

    let remaining: Vec<String> = list
        .shared_user_ids
        .iter()
        .filter(|id| *id != user_id)
        .cloned()
        .collect();

    if remaining.is_empty() {
        store.delete(list_id).await
    } else {
        store.set_members(list_id, &remaining).await
    }
}
