//! Session Integration Tests
//!
//! Drives [`ListSession`] against the in-memory backends: live snapshots,
//! order reconciliation, reorder suppression, and rollback on failed writes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use crate::domain::{DomainError, SharedList, TodoItem};
    use crate::repository::{
        ListStore, LocalStore, MemoryListStore, MemoryLocalStore, MemoryProfileStore,
    };
    use crate::session::ListSession;

    struct Fixture {
        store: Arc<MemoryListStore>,
        local: Arc<MemoryLocalStore>,
        profiles: Arc<MemoryProfileStore>,
        session: ListSession,
    }

    fn fixture(user_id: &str) -> Fixture {
        let store = Arc::new(MemoryListStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let session = ListSession::new(user_id, store.clone(), local.clone(), profiles.clone());
        Fixture { store, local, profiles, session }
    }

    fn seeded(id: &str, title: &str, code: &str, members: &[&str]) -> SharedList {
        let mut list = SharedList::new(title, code, "");
        list.id = id.to_string();
        list.shared_user_ids = members.iter().map(|m| m.to_string()).collect();
        list
    }

    async fn wait_for(
        session: &ListSession,
        check: impl Fn(&[SharedList]) -> bool,
    ) -> Vec<SharedList> {
        for _ in 0..200 {
            let lists = session.lists().await;
            if check(&lists) {
                return lists;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for session state");
    }

    fn ids(lists: &[SharedList]) -> Vec<&str> {
        lists.iter().map(|l| l.id.as_str()).collect()
    }

    // ── Observation and ordering ─────────────────────────────────────────

    #[tokio::test]
    async fn test_snapshot_sorted_by_saved_order() {
        // C = [B, A], S = {A, B, D} -> [B, A, D]
        let fx = fixture("u1");
        fx.local.set("listOrder_u1", json!(["B", "A"])).await.unwrap();
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        fx.store.create(&seeded("D", "delta", "DDD-DDD", &["u1"])).await.unwrap();

        fx.session.observe().await;
        let lists = wait_for(&fx.session, |l| l.len() == 3).await;
        assert_eq!(ids(&lists), ["B", "A", "D"]);
        assert!(!fx.session.is_loading().await);
    }

    #[tokio::test]
    async fn test_pruned_order_is_persisted_immediately() {
        let fx = fixture("u1");
        fx.local
            .set("listOrder_u1", json!(["B", "gone", "A"]))
            .await
            .unwrap();
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();

        fx.session.observe().await;
        let lists = wait_for(&fx.session, |l| l.len() == 2).await;
        assert_eq!(ids(&lists), ["B", "A"]);

        // the dangling id is gone from the saved order
        for _ in 0..200 {
            if fx.local.get("listOrder_u1").await.unwrap() == Some(json!(["B", "A"])) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("pruned order was not persisted");
    }

    #[tokio::test]
    async fn test_malformed_document_does_not_poison_snapshot() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.insert_raw("bad", json!({ "title": 42, "sharedUserIDs": ["u1"] }));

        fx.session.observe().await;
        let lists = wait_for(&fx.session, |l| l.len() == 1).await;
        assert_eq!(ids(&lists), ["A"]);
        assert!(fx.session.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ids_keep_first_seen() {
        let fx = fixture("u1");
        fx.store
            .insert_raw("X", json!({ "title": "first", "sharedUserIDs": ["u1"] }));
        fx.store
            .insert_raw("X", json!({ "title": "second", "sharedUserIDs": ["u1"] }));

        fx.session.observe().await;
        let lists = wait_for(&fx.session, |l| l.len() == 1).await;
        assert_eq!(lists[0].title, "first");
    }

    #[tokio::test]
    async fn test_member_nicknames_resolved_from_snapshot() {
        let fx = fixture("u1");
        fx.profiles.insert("u1", "Ana");
        fx.profiles.insert("u2", "Ben");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1", "u2"])).await.unwrap();

        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        for _ in 0..200 {
            if fx.session.display_name("u2") == Some("Ben".to_string()) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("nickname was not resolved");
    }

    #[tokio::test]
    async fn test_stop_observing_ends_updates() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.stop_observing().await;
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.session.lists().await.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_with_no_user_clears_state() {
        let fx = fixture("");
        fx.session.observe().await;
        assert!(fx.session.lists().await.is_empty());
        assert!(matches!(
            fx.session.join_list("AAA-AAA").await.unwrap_err(),
            DomainError::InvalidInput(_)
        ));
    }

    // ── Reorder session ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_snapshot_suppressed_while_reordering() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 2).await;

        fx.session.begin_reorder().await;
        fx.store.create(&seeded("C", "gamma", "CCC-CCC", &["u1"])).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        // the snapshot carrying C arrived mid-gesture and was dropped
        assert_eq!(fx.session.lists().await.len(), 2);

        fx.session
            .commit_reorder(vec!["B".to_string(), "A".to_string()])
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        // still inside the settle window
        assert_eq!(ids(&fx.session.lists().await), ["B", "A"]);

        sleep(Duration::from_millis(600)).await;
        // suppression lifted; the next change syncs everything back in
        fx.store.create(&seeded("D", "delta", "DDD-DDD", &["u1"])).await.unwrap();
        let lists = wait_for(&fx.session, |l| l.len() == 4).await;
        assert_eq!(ids(&lists), ["B", "A", "C", "D"]);
    }

    #[tokio::test]
    async fn test_commit_reorder_applies_and_persists() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        fx.store.create(&seeded("C", "gamma", "CCC-CCC", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 3).await;

        fx.session.begin_reorder().await;
        fx.session
            .commit_reorder(vec!["C".to_string(), "A".to_string(), "B".to_string()])
            .await
            .unwrap();

        assert_eq!(ids(&fx.session.lists().await), ["C", "A", "B"]);
        assert_eq!(
            fx.local.get("listOrder_u1").await.unwrap(),
            Some(json!(["C", "A", "B"]))
        );
    }

    #[tokio::test]
    async fn test_rearmed_reorder_outlives_stale_settle_timer() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.begin_reorder().await;
        fx.session.commit_reorder(vec!["A".to_string()]).await.unwrap();
        // a second gesture starts before the first settle delay elapses
        fx.session.begin_reorder().await;

        // first timer has fired by now; the re-armed flag must survive it
        sleep(Duration::from_millis(700)).await;
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.session.lists().await.len(), 1);

        fx.session.commit_reorder(vec!["A".to_string()]).await.unwrap();
        sleep(Duration::from_millis(700)).await;
        fx.store.create(&seeded("C", "gamma", "CCC-CCC", &["u1"])).await.unwrap();
        wait_for(&fx.session, |l| l.len() == 3).await;
    }

    // ── List mutations ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_list_arrives_via_snapshot() {
        let fx = fixture("u1");
        fx.session.observe().await;

        let id = fx
            .session
            .create_list("Groceries", Some("weekly".to_string()), None)
            .await
            .unwrap();

        let lists = wait_for(&fx.session, |l| l.len() == 1).await;
        assert_eq!(lists[0].id, id);
        assert_eq!(lists[0].title, "Groceries");
        assert!(lists[0].is_member("u1"));
        // "A1B-2C3" shape
        assert_eq!(lists[0].share_code.len(), 7);
        assert_eq!(lists[0].share_code.chars().nth(3), Some('-'));
    }

    #[tokio::test]
    async fn test_create_list_requires_title() {
        let fx = fixture("u1");
        let err = fx.session.create_list("   ", None, None).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
        assert!(fx.store.lists_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_list_rolls_back_on_failed_write() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.store.set_fail_writes(true);
        let err = fx
            .session
            .update_list("A", "renamed", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Remote(_)));

        let lists = fx.session.lists().await;
        assert_eq!(lists[0].title, "alpha");
        assert!(fx.session.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_last_member_leaving_deletes_list() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.leave_lists(&["A".to_string()]).await;

        // deleted outright, not left behind with an empty membership
        assert!(fx.store.get("A").await.unwrap().is_none());
        assert!(fx.session.lists().await.is_empty());
    }

    #[tokio::test]
    async fn test_leaving_keeps_list_for_remaining_members() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1", "u2"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.leave_lists(&["A".to_string()]).await;

        let remaining = fx.store.get("A").await.unwrap().unwrap();
        assert_eq!(remaining.shared_user_ids, vec!["u2".to_string()]);
        assert!(fx.session.lists().await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_list_deletes_regardless_of_membership() {
        let fx = fixture("u1");
        fx.local.set("listOrder_u1", json!(["A", "B"])).await.unwrap();
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1", "u2"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 2).await;

        fx.session.complete_list("A").await.unwrap();

        assert!(fx.store.get("A").await.unwrap().is_none());
        assert_eq!(ids(&fx.session.lists().await), ["B"]);
        assert_eq!(fx.local.get("listOrder_u1").await.unwrap(), Some(json!(["B"])));
    }

    #[tokio::test]
    async fn test_join_with_own_share_code_is_rejected() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        let err = fx.session.join_list("AAA-AAA").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        // no duplicate membership write happened
        let list = fx.store.get("A").await.unwrap().unwrap();
        assert_eq!(list.shared_user_ids, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_join_rejects_remote_membership_even_without_local_copy() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u2", "u1"])).await.unwrap();

        let err = fx.session.join_list("AAA-AAA").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let fx = fixture("u1");
        let err = fx.session.join_list("ZZZ-999").await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_join_adds_member_once() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u2"])).await.unwrap();

        let joined = fx.session.join_list("AAA-AAA").await.unwrap();
        assert_eq!(joined, "A");

        let list = fx.store.get("A").await.unwrap().unwrap();
        assert_eq!(list.shared_user_ids, vec!["u2".to_string(), "u1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_all_data_scrubs_membership() {
        let fx = fixture("u1");
        fx.local.set("listOrder_u1", json!(["A", "B"])).await.unwrap();
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.store.create(&seeded("B", "beta", "BBB-BBB", &["u1", "u2"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 2).await;

        fx.session.delete_all_data().await;

        // sole-member list deleted, shared list keeps the other member
        assert!(fx.store.get("A").await.unwrap().is_none());
        let shared = fx.store.get("B").await.unwrap().unwrap();
        assert_eq!(shared.shared_user_ids, vec!["u2".to_string()]);

        assert!(fx.session.lists().await.is_empty());
        assert!(fx.local.get("listOrder_u1").await.unwrap().is_none());
    }

    // ── Todo mutations ───────────────────────────────────────────────────

    fn list_with_todo(id: &str, todo_id: &str) -> SharedList {
        let mut list = seeded(id, "alpha", "AAA-AAA", &["u1"]);
        let mut todo = TodoItem::new("milk");
        todo.id = todo_id.to_string();
        list.todos.push(todo);
        list
    }

    #[tokio::test]
    async fn test_add_todo_optimistic_then_confirmed() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        let todo = TodoItem::new("milk");
        fx.session.add_todo("A", todo.clone()).await.unwrap();

        assert_eq!(fx.session.lists().await[0].todos.len(), 1);
        let stored = fx.store.get("A").await.unwrap().unwrap();
        assert_eq!(stored.todos, vec![todo]);
    }

    #[tokio::test]
    async fn test_add_todo_rolls_back_on_failed_write() {
        let fx = fixture("u1");
        fx.store.create(&seeded("A", "alpha", "AAA-AAA", &["u1"])).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.store.set_fail_writes(true);
        let err = fx.session.add_todo("A", TodoItem::new("milk")).await.unwrap_err();
        assert!(matches!(err, DomainError::Remote(_)));
        assert!(fx.session.lists().await[0].todos.is_empty());
    }

    #[tokio::test]
    async fn test_add_todo_requires_title() {
        let fx = fixture("u1");
        let err = fx.session.add_todo("A", TodoItem::new("  ")).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_toggle_todo_reverts_on_failed_write() {
        let fx = fixture("u1");
        fx.store.create(&list_with_todo("A", "t1")).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.store.set_fail_writes(true);
        let err = fx.session.toggle_todo("A", "t1").await.unwrap_err();
        assert!(matches!(err, DomainError::Remote(_)));

        // the flag is back to its pre-toggle value
        assert!(!fx.session.lists().await[0].todos[0].is_completed);
    }

    #[tokio::test]
    async fn test_toggle_todo_rewrites_whole_array() {
        let fx = fixture("u1");
        fx.store.create(&list_with_todo("A", "t1")).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.toggle_todo("A", "t1").await.unwrap();

        assert!(fx.session.lists().await[0].todos[0].is_completed);
        let stored = fx.store.get("A").await.unwrap().unwrap();
        assert!(stored.todos[0].is_completed);
    }

    #[tokio::test]
    async fn test_update_todo_rolls_back_on_failed_write() {
        let fx = fixture("u1");
        fx.store.create(&list_with_todo("A", "t1")).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.store.set_fail_writes(true);
        let err = fx
            .session
            .update_todo("A", "t1", "oat milk", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Remote(_)));
        assert_eq!(fx.session.lists().await[0].todos[0].title, "milk");
    }

    #[tokio::test]
    async fn test_delete_todos_removes_selection() {
        let fx = fixture("u1");
        let mut list = list_with_todo("A", "t1");
        let mut second = TodoItem::new("eggs");
        second.id = "t2".to_string();
        list.todos.push(second);
        fx.store.create(&list).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        fx.session.delete_todos("A", &["t1".to_string()]).await.unwrap();

        let stored = fx.store.get("A").await.unwrap().unwrap();
        assert_eq!(stored.todos.len(), 1);
        assert_eq!(stored.todos[0].id, "t2");
    }

    #[tokio::test]
    async fn test_update_todo_order_rolls_back_on_failed_write() {
        let fx = fixture("u1");
        let mut list = list_with_todo("A", "t1");
        let mut second = TodoItem::new("eggs");
        second.id = "t2".to_string();
        list.todos.push(second);
        fx.store.create(&list).await.unwrap();
        fx.session.observe().await;
        wait_for(&fx.session, |l| l.len() == 1).await;

        let reversed: Vec<TodoItem> = fx.session.lists().await[0]
            .todos
            .iter()
            .rev()
            .cloned()
            .collect();

        fx.store.set_fail_writes(true);
        let err = fx
            .session
            .update_todo_order("A", reversed)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Remote(_)));

        let lists = fx.session.lists().await;
        assert_eq!(lists[0].todos[0].id, "t1");
        assert_eq!(lists[0].todos[1].id, "t2");
    }
}
