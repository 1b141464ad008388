//! Shared List Entity
//!
//! A to-do list shared between users, mirrored from a remote document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{DomainError, DomainResult};
use super::todo::TodoItem;

/// A shared to-do list.
///
/// The serialized form is the remote document body; the id lives outside the
/// body (it is the document key) and is attached when a document is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedList {
    /// Document id, assigned by the store or generated before the first write
    #[serde(skip)]
    pub id: String,
    /// List title
    #[serde(default)]
    pub title: String,
    /// Optional secondary text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Completion status of the whole list
    #[serde(default)]
    pub is_completed: bool,
    /// Optional due timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Ordered to-dos; the order is meaningful and persisted as-is
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    /// Short invite code, unique among active lists
    #[serde(default)]
    pub share_code: String,
    /// Member user ids; non-empty while the list exists
    #[serde(default, rename = "sharedUserIDs")]
    pub shared_user_ids: Vec<String>,
}

impl SharedList {
    /// Create a new list owned by `user_id`, with a freshly generated id
    pub fn new(title: impl Into<String>, share_code: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            subtitle: None,
            is_completed: false,
            due_date: None,
            todos: Vec::new(),
            share_code: share_code.into(),
            shared_user_ids: vec![user_id.into()],
        }
    }

    /// Parse a raw document body into a list, attaching the document id.
    ///
    /// Missing fields fall back to defaults; a body that is not an object or
    /// carries wrongly typed fields is rejected.
    pub fn from_document(id: &str, data: serde_json::Value) -> DomainResult<Self> {
        let mut list: SharedList = serde_json::from_value(data)
            .map_err(|e| DomainError::Remote(format!("malformed list document {}: {}", id, e)))?;
        list.id = id.to_string();
        Ok(list)
    }

    /// Serialize the list into a document body (id excluded)
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.shared_user_ids.iter().any(|id| id == user_id)
    }

    /// Completed fraction of the list's todos, 0.0 when there are none
    pub fn completion_progress(&self) -> f64 {
        if self.todos.is_empty() {
            return 0.0;
        }
        let completed = self.todos.iter().filter(|t| t.is_completed).count();
        completed as f64 / self.todos.len() as f64
    }
}

/// Editable header fields of a list, written as one field update.
///
/// `None` for `subtitle` or `due_date` clears the field on the remote
/// document (delete-field), it does not mean "leave unchanged".
#[derive(Debug, Clone, PartialEq)]
pub struct ListDetails {
    pub title: String,
    pub subtitle: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}
