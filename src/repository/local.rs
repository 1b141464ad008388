//! SQLite Local Store
//!
//! Durable device-local key-value storage backed by libsql.
//! Holds per-user presentation state such as the saved display order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Builder, Connection};
use tokio::sync::Mutex;

use crate::domain::{DomainError, DomainResult};

use super::traits::LocalStore;

/// SQLite implementation of [`LocalStore`]
pub struct SqliteLocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocalStore {
    /// Open (or create) the store at `path` and run migrations
    pub async fn open(path: &Path) -> DomainResult<Self> {
        let path = path
            .to_str()
            .ok_or_else(|| DomainError::InvalidInput("invalid store path".to_string()))?;
        Self::open_at(path).await
    }

    /// Open an in-memory store; contents vanish with the process
    pub async fn open_in_memory() -> DomainResult<Self> {
        Self::open_at(":memory:").await
    }

    async fn open_at(path: &str) -> DomainResult<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DomainError::Remote(format!("failed to open local store: {}", e)))?;
        let conn = db
            .connect()
            .map_err(|e| DomainError::Remote(format!("failed to connect: {}", e)))?;

        run_migrations(&conn).await?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }
}

/// Create the key-value table if this is a fresh database
async fn run_migrations(conn: &Connection) -> DomainResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS local_kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| DomainError::Remote(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> DomainResult<Option<serde_json::Value>> {
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query("SELECT value FROM local_kv WHERE key = ?", libsql::params![key])
            .await
            .map_err(|e| DomainError::Remote(e.to_string()))?;

        if let Ok(Some(row)) = rows.next().await {
            let raw = row
                .get::<String>(0)
                .map_err(|e| DomainError::Remote(e.to_string()))?;
            let value = serde_json::from_str(&raw)
                .map_err(|e| DomainError::Remote(format!("corrupt value under {}: {}", key, e)))?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> DomainResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT OR REPLACE INTO local_kv (key, value) VALUES (?, ?)",
            libsql::params![key, value.to_string()],
        )
        .await
        .map_err(|e| DomainError::Remote(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> DomainResult<()> {
        let conn = self.conn.lock().await;

        conn.execute("DELETE FROM local_kv WHERE key = ?", libsql::params![key])
            .await
            .map_err(|e| DomainError::Remote(e.to_string()))?;

        Ok(())
    }
}
