// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coaching conversation and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Default category for conversations started without one.
pub const DEFAULT_CATEGORY: &str = "general";

/// A coaching conversation (session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every message append
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default = "default_category")]
    pub category: String,
    /// Label suggested by the assistant
    #[serde(default)]
    pub ai_label: Option<String>,
    #[serde(default)]
    pub soft_deleted: bool,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            completed: false,
            category: default_category(),
            ai_label: None,
            soft_deleted: false,
        }
    }

    /// Title for a conversation created implicitly by its first message.
    pub fn title_from_message(content: &str) -> String {
        const MAX_TITLE_CHARS: usize = 48;
        let first_line = content.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            return "New conversation".to_string();
        }
        if first_line.chars().count() <= MAX_TITLE_CHARS {
            return first_line.to_string();
        }
        let truncated: String = first_line.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}…", truncated.trim_end())
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_voice: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_short_message() {
        assert_eq!(
            Conversation::title_from_message("I want to sleep better"),
            "I want to sleep better"
        );
    }

    #[test]
    fn test_title_from_long_message_is_truncated() {
        let content = "a".repeat(80);
        let title = Conversation::title_from_message(&content);
        assert_eq!(title.chars().count(), 49);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_title_from_blank_message() {
        assert_eq!(Conversation::title_from_message("  \n"), "New conversation");
    }

    #[test]
    fn test_missing_category_defaults() {
        let json = r#"{
            "id": "c1",
            "title": "Morning check-in",
            "created_at": "2024-01-15T10:00:00Z",
            "updated_at": "2024-01-15T10:00:00Z"
        }"#;
        let conversation: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(conversation.category, DEFAULT_CATEGORY);
        assert!(!conversation.soft_deleted);
    }
}
