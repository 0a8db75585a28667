//! Per-conversation message history.
//!
//! Conversations are created on first message, mutated append-only, and
//! deleted on user request. The title derives from the first user message.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const TITLE_CHARS: usize = 60;
const PREVIEW_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    fn preview(&self) -> String {
        truncate(&self.title, PREVIEW_CHARS)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

/// Process-wide conversation store.
#[derive(Default)]
pub struct ConversationStore {
    inner: DashMap<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation from its first user message.
    pub fn create(&self, first_message: &str) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: truncate(first_message, TITLE_CHARS),
            created_at: now,
            updated_at: now,
            messages: vec![Message {
                role: Role::User,
                content: first_message.to_string(),
                timestamp: now,
            }],
        };
        self.inner
            .insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    /// Append a message; unknown ids are ignored with a warning.
    pub fn append(&self, conversation_id: &str, role: Role, content: impl Into<String>) {
        match self.inner.get_mut(conversation_id) {
            Some(mut conversation) => {
                let now = Utc::now();
                conversation.messages.push(Message {
                    role,
                    content: content.into(),
                    timestamp: now,
                });
                conversation.updated_at = now;
            }
            None => {
                tracing::warn!(conversation_id, "append to unknown conversation");
            }
        }
    }

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.inner.get(conversation_id).map(|c| c.clone())
    }

    /// Summaries for the listing endpoint, newest first.
    pub fn list(&self) -> Vec<Value> {
        let mut conversations: Vec<Conversation> =
            self.inner.iter().map(|c| c.clone()).collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "title": c.title,
                    "preview": c.preview(),
                    "message_count": c.messages.len(),
                    "updated_at": c.updated_at.to_rfc3339(),
                })
            })
            .collect()
    }

    /// Remove the conversation; true when it existed.
    pub fn delete(&self, conversation_id: &str) -> bool {
        self.inner.remove(conversation_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_to_sixty_chars() {
        let store = ConversationStore::new();
        let long = "x".repeat(100);
        let conversation = store.create(&long);
        assert_eq!(conversation.title.chars().count(), TITLE_CHARS);
        assert_eq!(conversation.messages.len(), 1);
    }

    #[test]
    fn append_updates_timestamp_and_history() {
        let store = ConversationStore::new();
        let conversation = store.create("write a parser");
        store.append(&conversation.id, Role::Assistant, "here is the code");

        let loaded = store.get(&conversation.id).unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].role, Role::Assistant);
        assert!(loaded.updated_at >= loaded.created_at);
    }

    #[test]
    fn list_previews_are_forty_chars() {
        let store = ConversationStore::new();
        store.create(&"long title ".repeat(20));
        let listing = store.list();
        assert_eq!(listing.len(), 1);
        assert!(listing[0]["preview"].as_str().unwrap().chars().count() <= PREVIEW_CHARS);
    }

    #[test]
    fn delete_removes_conversation() {
        let store = ConversationStore::new();
        let conversation = store.create("hello");
        assert!(store.delete(&conversation.id));
        assert!(!store.delete(&conversation.id));
        assert!(store.get(&conversation.id).is_none());
    }
}
