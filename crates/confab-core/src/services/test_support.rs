//! Scripted in-memory [`ChatApi`] double for engine tests, in the spirit of
//! an in-memory repository: every response is queued up front and popped at
//! call time, so tests stay deterministic.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{ApiError, ApiResult};
use crate::models::conversation::{Conversation, ConversationPage, MessagePage};

use super::chat_api::{BoxFuture, ChatApi, EventStream};
use super::events::{BatchReply, SendOptions, SyncResponse};

#[derive(Default)]
pub struct ScriptedApi {
    pub conversations: Mutex<HashMap<String, (Conversation, MessagePage)>>,
    /// Artificial latency per conversation id, for race tests.
    pub fetch_delays: Mutex<HashMap<String, Duration>>,
    pub streams: Mutex<VecDeque<EventStream>>,
    pub open_stream_errors: Mutex<VecDeque<ApiError>>,
    pub batch_replies: Mutex<VecDeque<ApiResult<BatchReply>>>,
    pub sync_responses: Mutex<VecDeque<ApiResult<SyncResponse>>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_conversation(&self, conversation: Conversation, page: MessagePage) {
        self.conversations
            .lock()
            .insert(conversation.id.clone(), (conversation, page));
    }

    pub fn set_fetch_delay(&self, id: &str, delay: Duration) {
        self.fetch_delays.lock().insert(id.to_string(), delay);
    }

    pub fn push_stream(&self, stream: EventStream) {
        self.streams.lock().push_back(stream);
    }

    pub fn push_sync_response(&self, response: SyncResponse) {
        self.sync_responses.lock().push_back(Ok(response));
    }

    fn delay_for(&self, id: &str) -> Duration {
        self.fetch_delays
            .lock()
            .get(id)
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

fn not_found(id: &str) -> ApiError {
    ApiError::Server {
        code: Some("not_found".to_string()),
        message: format!("no conversation {id}"),
        retryable: false,
    }
}

impl ChatApi for ScriptedApi {
    fn list_conversations(
        &self,
        _cursor: Option<String>,
    ) -> BoxFuture<'static, ApiResult<ConversationPage>> {
        let conversations: Vec<Conversation> = self
            .conversations
            .lock()
            .values()
            .map(|(c, _)| c.clone())
            .collect();
        Box::pin(async move {
            Ok(ConversationPage {
                conversations,
                next_cursor: None,
            })
        })
    }

    fn fetch_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<Conversation>> {
        let delay = self.delay_for(id);
        let result = self
            .conversations
            .lock()
            .get(id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| not_found(id));
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }

    fn fetch_messages(
        &self,
        conversation_id: &str,
        _before: Option<String>,
    ) -> BoxFuture<'static, ApiResult<MessagePage>> {
        let delay = self.delay_for(conversation_id);
        let result = self
            .conversations
            .lock()
            .get(conversation_id)
            .map(|(_, page)| page.clone())
            .ok_or_else(|| not_found(conversation_id));
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }

    fn fetch_message_window(
        &self,
        conversation_id: &str,
        _message_id: &str,
    ) -> BoxFuture<'static, ApiResult<MessagePage>> {
        self.fetch_messages(conversation_id, None)
    }

    fn create_conversation(
        &self,
        title: &str,
        model: &str,
    ) -> BoxFuture<'static, ApiResult<Conversation>> {
        let count = self.conversations.lock().len();
        let conversation = Conversation {
            id: format!("srv-{}", count + 1),
            title: title.to_string(),
            model: model.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            message_count: 0,
        };
        self.conversations.lock().insert(
            conversation.id.clone(),
            (conversation.clone(), MessagePage::default()),
        );
        Box::pin(async move { Ok(conversation) })
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>> {
        self.deleted.lock().push(id.to_string());
        self.conversations.lock().remove(id);
        Box::pin(async move { Ok(()) })
    }

    fn send_batch(
        &self,
        _conversation_id: &str,
        _text: &str,
        _options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<BatchReply>> {
        let reply = self
            .batch_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted batch reply"));
        Box::pin(async move { reply })
    }

    fn open_stream(
        &self,
        _conversation_id: &str,
        _text: &str,
        _options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        if let Some(error) = self.open_stream_errors.lock().pop_front() {
            return Box::pin(async move { Err(error) });
        }
        let stream = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted stream"));
        Box::pin(async move { Ok(stream) })
    }

    fn sync(
        &self,
        _since: Option<DateTime<Utc>>,
        _full: bool,
    ) -> BoxFuture<'static, ApiResult<SyncResponse>> {
        let response = self
            .sync_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted sync response"));
        Box::pin(async move { response })
    }
}
