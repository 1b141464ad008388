//! Todo Entity
//!
//! A single to-do entry owned by exactly one shared list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One to-do inside a shared list.
///
/// The id is stable for the lifetime of the entry; it is generated locally
/// before the first write and never reassigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Stable identifier within the parent list
    #[serde(default)]
    pub id: String,
    /// Todo text
    #[serde(default)]
    pub title: String,
    /// Optional secondary text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Completion status
    #[serde(default)]
    pub is_completed: bool,
    /// Optional due timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TodoItem {
    /// Create a new open todo with a freshly generated id
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            subtitle: None,
            is_completed: false,
            due_date: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }
}
