pub mod chat_api;
pub mod conversation_service;
pub mod events;
pub mod message_service;
pub mod sync_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use chat_api::{ChatApi, EventStream, HttpChatApi, TokenProvider};
pub use events::{BatchReply, SendOptions, StreamEvent, SyncConversation, SyncResponse};
pub use message_service::StreamOutcome;
pub use sync_service::{NoopObserver, SyncManager, SyncObserver};
