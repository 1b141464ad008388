//! Display Order Reconciliation
//!
//! Merges an unordered snapshot of lists with the locally remembered
//! display order. Pure functions, so the sort/prune/dedup behavior is
//! testable without a store or a running session.

use std::collections::HashSet;

use crate::domain::SharedList;

/// Settling delay after a reorder commit before inbound snapshots are
/// applied again; absorbs the round-trip latency of the live query.
pub const REORDER_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Local-storage key for a user's saved display order
pub(crate) fn order_key(user_id: &str) -> String {
    format!("listOrder_{}", user_id)
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Snapshot entities in display order
    pub lists: Vec<SharedList>,
    /// Cached order with identifiers of vanished lists pruned
    pub order: Vec<String>,
    /// Whether `order` differs from the cache that was passed in
    pub order_changed: bool,
}

/// Order a snapshot by the cached display order.
///
/// Entities found in `cached_order` sort by their cached index; the rest
/// sort after them, keeping the snapshot's own relative order (the sort is
/// stable). Duplicate identifiers keep the first occurrence only. The
/// returned order is `cached_order` minus identifiers that no longer exist;
/// identifiers of newly observed lists are not added here, they enter the
/// saved order with the next committed reorder.
pub fn reconcile(live: Vec<SharedList>, cached_order: &[String]) -> Reconciled {
    let mut seen = HashSet::new();
    let mut lists: Vec<SharedList> = live
        .into_iter()
        .filter(|list| seen.insert(list.id.clone()))
        .collect();

    lists.sort_by_key(|list| {
        cached_order
            .iter()
            .position(|id| id == &list.id)
            .unwrap_or(usize::MAX)
    });

    let live_ids: HashSet<&str> = lists.iter().map(|l| l.id.as_str()).collect();
    let order: Vec<String> = cached_order
        .iter()
        .filter(|id| live_ids.contains(id.as_str()))
        .cloned()
        .collect();
    let order_changed = order.len() != cached_order.len();

    Reconciled { lists, order, order_changed }
}
