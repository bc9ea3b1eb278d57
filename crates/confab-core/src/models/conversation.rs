use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix reserved for client-generated ids pending server persistence.
/// Ids carrying this prefix are excluded from all server-addressed
/// operations until the server has issued a real id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Allocate a fresh client-side temporary id.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

/// Whether an id is client-only and must not be sent to the server.
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// A conversation as known to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Server-side total hint, used only for sync comparisons and never the
    /// source of truth for rendering.
    #[serde(default)]
    pub message_count: u64,
}

impl Conversation {
    /// Create a client-only conversation that has not been persisted yet.
    pub fn new_temporary(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: temp_id(),
            title: title.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
            message_count: 0,
        }
    }

    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A citation attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLink {
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
}

/// An image produced during generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    #[serde(default)]
    pub sources: Vec<SourceLink>,
    #[serde(default)]
    pub generated_images: Vec<GeneratedImage>,
    pub created_at: DateTime<Utc>,
    /// Set when a stream was interrupted after content had accumulated; the
    /// partial text is kept and rendered with an "incomplete" flag.
    #[serde(default)]
    pub incomplete: bool,
}

impl Message {
    /// An optimistic user message carrying a temporary id. The id is
    /// remapped once the server confirms persistence, so any code path that
    /// references "the message just sent" must tolerate the remap.
    pub fn optimistic_user(content: impl Into<String>, files: Vec<FileAttachment>) -> Self {
        Self {
            id: temp_id(),
            role: MessageRole::User,
            content: content.into(),
            files,
            sources: Vec::new(),
            generated_images: Vec::new(),
            created_at: Utc::now(),
            incomplete: false,
        }
    }

    /// The empty assistant placeholder appended while a response streams in.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: temp_id(),
            role: MessageRole::Assistant,
            content: String::new(),
            files: Vec::new(),
            sources: Vec::new(),
            generated_images: Vec::new(),
            created_at: Utc::now(),
            incomplete: false,
        }
    }
}

/// One window of a conversation's messages plus pagination metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// The server's true total for the conversation. This, and never the
    /// length of the partial `messages` vec, is what sync baselines are
    /// reset from.
    pub total_count: u64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One page of the conversation list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_ids_are_recognized() {
        let id = temp_id();
        assert!(is_temp_id(&id));
        assert!(!is_temp_id("c-42"));
    }

    #[test]
    fn test_temporary_conversation() {
        let conv = Conversation::new_temporary("New Chat", "default");
        assert!(conv.is_temporary());
        assert_eq!(conv.message_count, 0);
    }

    #[test]
    fn test_optimistic_messages_carry_temp_ids() {
        let user = Message::optimistic_user("hello", Vec::new());
        let placeholder = Message::assistant_placeholder();
        assert!(is_temp_id(&user.id));
        assert!(is_temp_id(&placeholder.id));
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(placeholder.role, MessageRole::Assistant);
        assert!(placeholder.content.is_empty());
    }
}
