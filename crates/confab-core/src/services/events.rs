use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::conversation::{
    Conversation, FileAttachment, GeneratedImage, Message, SourceLink,
};

/// One incremental generation event from the streaming endpoint.
///
/// Events arrive strictly ordered and are folded one at a time; `done` and
/// `error` are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thinking {
        /// Cumulative thinking text; each event replaces the previous one.
        text: String,
    },
    ToolStart {
        tool: String,
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    ToolDetail {
        tool: String,
        detail: String,
    },
    ToolEnd {
        tool: String,
    },
    Token {
        text: String,
    },
    /// The server persisted the user message; carries the real id that
    /// replaces the client's temporary one.
    UserMessageSaved {
        user_message_id: String,
    },
    Done {
        id: String,
        created_at: DateTime<Utc>,
        #[serde(default)]
        sources: Vec<SourceLink>,
        #[serde(default)]
        generated_images: Vec<GeneratedImage>,
        #[serde(default)]
        files: Vec<FileAttachment>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        retryable: Option<bool>,
    },
}

/// Options attached to a send, batch or streaming.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
    /// One-shot forced-tool hints, consumed by the next generation only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forced_tools: Vec<String>,
}

/// Reply from the batch (single request/response) send endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchReply {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Per-conversation entry in a sync response: enough for the sync manager
/// to compute deltas without transferring message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConversation {
    pub id: String,
    pub title: String,
    pub model: String,
    pub message_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl SyncConversation {
    /// Project into a list entry. Sync responses carry no creation time, so
    /// `updated_at` stands in until a full fetch replaces it.
    pub fn to_conversation(&self) -> Conversation {
        Conversation {
            id: self.id.clone(),
            title: self.title.clone(),
            model: self.model.clone(),
            created_at: self.updated_at,
            updated_at: self.updated_at,
            message_count: self.message_count,
        }
    }
}

/// Response from the sync endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub conversations: Vec<SyncConversation>,
    /// True when this is a full snapshot; only a full snapshot can reveal
    /// deletions, which a delta sync cannot.
    #[serde(default)]
    pub full: bool,
    pub server_time: DateTime<Utc>,
}
