//! Profile Session
//!
//! Manages the signed-in user's own nickname: local-first persistence with
//! a merge-write to the profile store, and a pull from the store when a new
//! device has no local copy yet.

use std::sync::Arc;

use log::warn;
use tokio::sync::Mutex;

use crate::domain::{DomainError, DomainResult};
use crate::repository::{LocalStore, ProfileStore};

fn nickname_key(user_id: &str) -> String {
    format!("nickname_{}", user_id)
}

/// The session user's profile state.
///
/// The local copy is authoritative for display; the remote write is a
/// merge, so other profile fields survive it.
pub struct ProfileSession {
    user_id: String,
    profiles: Arc<dyn ProfileStore>,
    local: Arc<dyn LocalStore>,
    nickname: Mutex<String>,
}

impl ProfileSession {
    pub fn new(
        user_id: impl Into<String>,
        profiles: Arc<dyn ProfileStore>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            profiles,
            local,
            nickname: Mutex::new(String::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn nickname(&self) -> String {
        self.nickname.lock().await.clone()
    }

    pub async fn is_nickname_set(&self) -> bool {
        !self.nickname.lock().await.is_empty()
    }

    /// Load the locally saved nickname; when there is none (fresh device),
    /// fall back to the remote profile.
    pub async fn load(&self) {
        if self.user_id.is_empty() {
            return;
        }
        match self.local.get(&nickname_key(&self.user_id)).await {
            Ok(Some(value)) => {
                if let Some(saved) = value.as_str() {
                    *self.nickname.lock().await = saved.to_string();
                }
            }
            Ok(None) => {}
            Err(e) => warn!("failed to read saved nickname: {}", e),
        }

        if self.nickname.lock().await.is_empty() {
            self.sync_from_remote().await;
        }
    }

    /// Set and persist the nickname.
    ///
    /// The local copy is written first and kept even when the remote
    /// merge-write fails; the failure is logged and returned so the caller
    /// can surface it.
    pub async fn set_nickname(&self, nickname: &str) -> DomainResult<()> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(DomainError::InvalidInput("nickname must not be empty".to_string()));
        }
        if self.user_id.is_empty() {
            return Err(DomainError::InvalidInput("no signed-in user".to_string()));
        }

        self.cache_nickname(nickname).await;

        if let Err(e) = self.profiles.set_nickname(&self.user_id, nickname).await {
            warn!("failed to persist nickname remotely: {}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Forget the local profile state (sign-out, account deletion)
    pub async fn clear(&self) {
        self.nickname.lock().await.clear();
        if self.user_id.is_empty() {
            return;
        }
        if let Err(e) = self.local.remove(&nickname_key(&self.user_id)).await {
            warn!("failed to clear saved nickname: {}", e);
        }
    }

    async fn sync_from_remote(&self) {
        match self.profiles.nickname(&self.user_id).await {
            Ok(Some(remote)) => self.cache_nickname(&remote).await,
            Ok(None) => {}
            Err(e) => warn!("nickname sync failed: {}", e),
        }
    }

    async fn cache_nickname(&self, nickname: &str) {
        *self.nickname.lock().await = nickname.to_string();
        if let Err(e) = self
            .local
            .set(&nickname_key(&self.user_id), serde_json::Value::String(nickname.to_string()))
            .await
        {
            warn!("failed to save nickname locally: {}", e);
        }
    }
}
