//! Nickname Resolution
//!
//! Resolves user ids to display nicknames, batching remote lookups and
//! caching results for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::repository::ProfileStore;

/// Remote "id in set" queries accept at most this many ids per batch
pub const NICKNAME_BATCH_SIZE: usize = 10;

/// Process-lifetime nickname cache over a [`ProfileStore`].
///
/// Entries are never proactively invalidated; nicknames change rarely and
/// staleness is an accepted tradeoff.
pub struct NicknameResolver {
    profiles: Arc<dyn ProfileStore>,
    cache: Mutex<HashMap<String, String>>,
}

impl NicknameResolver {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles, cache: Mutex::new(HashMap::new()) }
    }

    /// Cached nickname for `user_id`, if any
    pub fn display_name(&self, user_id: &str) -> Option<String> {
        self.cache.lock().unwrap().get(user_id).cloned()
    }

    /// Fetch nicknames for any of `user_ids` not yet cached.
    ///
    /// Ids are deduplicated and fetched in batches of
    /// [`NICKNAME_BATCH_SIZE`]; a failing batch is logged and the remaining
    /// batches still run.
    pub async fn ensure_nicknames(&self, user_ids: &[String]) {
        let wanted: Vec<String> = {
            let cache = self.cache.lock().unwrap();
            let mut seen = std::collections::HashSet::new();
            user_ids
                .iter()
                .filter(|id| !id.is_empty() && !cache.contains_key(*id) && seen.insert(*id))
                .cloned()
                .collect()
        };
        if wanted.is_empty() {
            return;
        }

        for batch in wanted.chunks(NICKNAME_BATCH_SIZE) {
            match self.profiles.nicknames(batch).await {
                Ok(found) => {
                    self.cache.lock().unwrap().extend(found);
                }
                Err(e) => {
                    warn!("nickname lookup failed for a batch of {}: {}", batch.len(), e);
                }
            }
        }
    }

    /// Drop every cached entry (account deletion)
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
