use std::sync::Arc;

use anyhow::{Result, bail};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::context::AppContext;
use crate::error::ApiError;
use crate::models::conversation::{Message, is_temp_id};
use crate::models::conversations_store::RequestKind;
use crate::models::request_registry::RequestHandle;
use crate::models::thinking_trace::ThinkingState;

use super::chat_api::{ChatApi, EventStream};
use super::events::{SendOptions, StreamEvent};

/// How a streaming send ended. Cancellation is a successful, intentional
/// outcome, never an error.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Ran to completion. Carries the server-issued message id and the
    /// finalized trace, when there is one worth rendering.
    Completed {
        message_id: String,
        trace: Option<ThinkingState>,
    },
    /// User pressed stop. `removed` is true when no content had accumulated
    /// and the placeholder was deleted instead of kept incomplete.
    Cancelled { removed: bool },
    /// Transport or server failure. Partial content, when any, is kept in
    /// the cached page flagged incomplete.
    Failed { error: ApiError, partial: bool },
}

/// Send a message over the streaming endpoint and fold the response events
/// into the store until the stream terminates, is cancelled, or fails.
///
/// Registry bookkeeping is released on every exit path: the request handle
/// ends itself when dropped.
pub async fn send_stream(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    conversation_id: &str,
    text: &str,
    options: SendOptions,
) -> Result<StreamOutcome> {
    if is_temp_id(conversation_id) {
        bail!("conversation {conversation_id} must be persisted before sending");
    }

    let handle = ctx.registry.begin(conversation_id, RequestKind::Stream)?;

    // Optimistic user message plus the empty assistant placeholder the
    // stream will fill in.
    let user_message = Message::optimistic_user(text, options.files.clone());
    let user_message_id = user_message.id.clone();
    let placeholder = Message::assistant_placeholder();
    let placeholder_id = placeholder.id.clone();
    {
        let mut store = ctx.store.lock();
        store.push_message(conversation_id, user_message);
        store.push_message(conversation_id, placeholder);
    }
    ctx.registry.record_placeholder(conversation_id, &placeholder_id);

    let events = match api.open_stream(conversation_id, text, options).await {
        Ok(events) => events,
        Err(error) => {
            // Nothing reached the server: drop both optimistic messages.
            let mut store = ctx.store.lock();
            store.remove_message(conversation_id, &placeholder_id);
            store.remove_message(conversation_id, &user_message_id);
            warn!(conv_id = %conversation_id, error = %error, "failed to open stream");
            return Ok(StreamOutcome::Failed {
                error,
                partial: false,
            });
        }
    };

    let outcome = consume_stream(ctx, &handle, user_message_id, placeholder_id, events).await;
    drop(handle);
    Ok(outcome)
}

/// The event loop for one live stream. Events are processed strictly in
/// arrival order; the cancel flag is observed at each suspension point.
async fn consume_stream(
    ctx: &AppContext,
    handle: &RequestHandle,
    mut user_message_id: String,
    placeholder_id: String,
    mut events: EventStream,
) -> StreamOutcome {
    let conversation_id = handle.conversation_id().to_string();
    let mut thinking = ThinkingState::default();
    let mut content = String::new();

    loop {
        if handle.is_cancelled() {
            return finish_cancelled(ctx, &conversation_id, &placeholder_id, &content);
        }
        let item = events.next().await;
        // The stop button may have been pressed while we were waiting.
        if handle.is_cancelled() {
            return finish_cancelled(ctx, &conversation_id, &placeholder_id, &content);
        }

        let event = match item {
            Some(Ok(event)) => event,
            Some(Err(error)) => {
                return finish_failed(ctx, &conversation_id, &placeholder_id, &content, error);
            }
            None => {
                // Connection closed without a terminal event.
                let error = ApiError::Network("stream ended before completion".to_string());
                return finish_failed(ctx, &conversation_id, &placeholder_id, &content, error);
            }
        };

        match event {
            StreamEvent::Token { ref text } => {
                thinking.note_token();
                content.push_str(text);
                let snapshot = content.clone();
                ctx.store
                    .lock()
                    .update_message(&conversation_id, &placeholder_id, |m| m.content = snapshot);
            }
            StreamEvent::UserMessageSaved {
                user_message_id: ref saved_id,
            } => {
                ctx.store
                    .lock()
                    .remap_message_id(&conversation_id, &user_message_id, saved_id);
                user_message_id = saved_id.clone();
            }
            StreamEvent::Done {
                id,
                created_at,
                sources,
                generated_images,
                files,
                title,
                language: _,
            } => {
                let has_trace = thinking.finalize();
                {
                    let mut store = ctx.store.lock();
                    store.update_message(&conversation_id, &placeholder_id, |m| {
                        m.id = id.clone();
                        m.created_at = created_at;
                        m.sources = sources.clone();
                        m.generated_images = generated_images.clone();
                        m.files = files.clone();
                        m.incomplete = false;
                    });
                    store.update_conversation(&conversation_id, |c| {
                        c.updated_at = created_at;
                        if let Some(title) = &title {
                            c.title = title.clone();
                        }
                    });
                }
                debug!(conv_id = %conversation_id, message_id = %id, "stream completed");
                return StreamOutcome::Completed {
                    message_id: id,
                    trace: has_trace.then(|| thinking.clone()),
                };
            }
            StreamEvent::Error {
                message,
                code,
                retryable,
            } => {
                let error = ApiError::Server {
                    code,
                    message,
                    retryable: retryable.unwrap_or(false),
                };
                return finish_failed(ctx, &conversation_id, &placeholder_id, &content, error);
            }
            other => thinking.apply(&other),
        }

        // Deep-copy the progress into the store record after every event so
        // switching away and back restores the in-flight UI verbatim.
        ctx.registry
            .record_progress(&conversation_id, &content, &thinking);
    }
}

/// User-intent stop: a success. Zero accumulated content means the
/// placeholder is removed entirely; otherwise the partial message stays,
/// flagged incomplete.
fn finish_cancelled(
    ctx: &AppContext,
    conversation_id: &str,
    placeholder_id: &str,
    content: &str,
) -> StreamOutcome {
    let removed = content.is_empty();
    {
        let mut store = ctx.store.lock();
        if removed {
            store.remove_message(conversation_id, placeholder_id);
        } else {
            store.update_message(conversation_id, placeholder_id, |m| m.incomplete = true);
        }
    }
    debug!(conv_id = %conversation_id, removed, "stream cancelled");
    StreamOutcome::Cancelled { removed }
}

fn finish_failed(
    ctx: &AppContext,
    conversation_id: &str,
    placeholder_id: &str,
    content: &str,
    error: ApiError,
) -> StreamOutcome {
    let partial = !content.is_empty();
    {
        let mut store = ctx.store.lock();
        if partial {
            store.update_message(conversation_id, placeholder_id, |m| m.incomplete = true);
        } else {
            store.remove_message(conversation_id, placeholder_id);
        }
    }
    warn!(conv_id = %conversation_id, error = %error, partial, "stream failed");
    StreamOutcome::Failed { error, partial }
}

/// Send a message over the batch endpoint. The optimistic user message is
/// replaced by the server's copy on success and dropped on failure; errors
/// propagate to the orchestrator, which owns user-facing notification.
pub async fn send_batch(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    conversation_id: &str,
    text: &str,
    options: SendOptions,
) -> Result<Message> {
    if is_temp_id(conversation_id) {
        bail!("conversation {conversation_id} must be persisted before sending");
    }

    let handle = ctx.registry.begin(conversation_id, RequestKind::Batch)?;

    let user_message = Message::optimistic_user(text, options.files.clone());
    let temp_user_id = user_message.id.clone();
    ctx.store.lock().push_message(conversation_id, user_message);

    let reply = match api.send_batch(conversation_id, text, options).await {
        Ok(reply) => reply,
        Err(error) => {
            ctx.store
                .lock()
                .remove_message(conversation_id, &temp_user_id);
            drop(handle);
            return Err(error.into());
        }
    };

    {
        let mut store = ctx.store.lock();
        store.remove_message(conversation_id, &temp_user_id);
        store.push_message(conversation_id, reply.user_message.clone());
        store.push_message(conversation_id, reply.assistant_message.clone());
        store.update_conversation(conversation_id, |c| {
            c.updated_at = reply.assistant_message.created_at;
        });
    }
    drop(handle);
    Ok(reply.assistant_message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::{Conversation, MessagePage, MessageRole};
    use crate::services::test_support::ScriptedApi;
    use chrono::Utc;

    fn setup(conversation_id: &str) -> (AppContext, Arc<ScriptedApi>, Arc<dyn ChatApi>) {
        let ctx = AppContext::new();
        let mut conv = Conversation::new_temporary("Test", "default");
        conv.id = conversation_id.to_string();
        ctx.store.lock().upsert_conversation(conv.clone());

        let api = Arc::new(ScriptedApi::new());
        api.insert_conversation(conv, MessagePage::default());
        let dyn_api: Arc<dyn ChatApi> = api.clone();
        (ctx, api, dyn_api)
    }

    fn scripted_events(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    fn token(text: &str) -> StreamEvent {
        StreamEvent::Token {
            text: text.to_string(),
        }
    }

    fn done(id: &str) -> StreamEvent {
        StreamEvent::Done {
            id: id.to_string(),
            created_at: Utc::now(),
            sources: Vec::new(),
            generated_images: Vec::new(),
            files: Vec::new(),
            title: None,
            language: None,
        }
    }

    #[tokio::test]
    async fn test_stream_runs_to_completion() {
        let (ctx, api, dyn_api) = setup("c-1");
        api.push_stream(scripted_events(vec![
            StreamEvent::UserMessageSaved {
                user_message_id: "m-1".to_string(),
            },
            StreamEvent::Thinking {
                text: "planning".to_string(),
            },
            StreamEvent::ToolStart {
                tool: "search".to_string(),
                detail: None,
                metadata: None,
            },
            StreamEvent::ToolEnd {
                tool: "search".to_string(),
            },
            token("Hello"),
            token(" world"),
            done("m-2"),
        ]));

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        let StreamOutcome::Completed { message_id, trace } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(message_id, "m-2");
        let trace = trace.unwrap();
        assert_eq!(trace.completed_tools, vec!["search".to_string()]);

        let store = ctx.store.lock();
        let page = store.page("c-1").unwrap();
        assert_eq!(page.messages.len(), 2);
        // Temp user id remapped to the server-issued one.
        assert_eq!(page.messages[0].id, "m-1");
        assert_eq!(page.messages[0].role, MessageRole::User);
        assert_eq!(page.messages[1].id, "m-2");
        assert_eq!(page.messages[1].content, "Hello world");
        assert!(!page.messages[1].incomplete);
        // Registry fully released.
        assert!(store.active_request("c-1").is_none());
        assert!(store.streaming_conversation_id().is_none());
    }

    #[tokio::test]
    async fn test_cancel_with_zero_content_removes_placeholder() {
        let (ctx, api, dyn_api) = setup("c-1");
        let registry = ctx.registry.clone();
        api.push_stream(Box::pin(async_stream::stream! {
            // Simulates the stop click arriving while the stream is live
            // but before any token.
            registry.cancel("c-1");
            yield Ok(StreamEvent::Thinking { text: "hmm".to_string() });
        }));

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, StreamOutcome::Cancelled { removed: true }));
        {
            let store = ctx.store.lock();
            let page = store.page("c-1").unwrap();
            // The placeholder is gone; the user message stays.
            assert_eq!(page.messages.len(), 1);
            assert_eq!(page.messages[0].role, MessageRole::User);
            assert!(store.active_request("c-1").is_none());
        }
        // Nothing left to cancel.
        assert!(!ctx.registry.cancel("c-1"));
    }

    #[tokio::test]
    async fn test_cancel_with_content_keeps_partial_flagged_incomplete() {
        let (ctx, api, dyn_api) = setup("c-1");
        let registry = ctx.registry.clone();
        api.push_stream(Box::pin(async_stream::stream! {
            yield Ok(StreamEvent::Token { text: "Partial answer".to_string() });
            registry.cancel("c-1");
            yield Ok(StreamEvent::Token { text: " discarded".to_string() });
        }));

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            StreamOutcome::Cancelled { removed: false }
        ));
        let store = ctx.store.lock();
        let page = store.page("c-1").unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[1].content, "Partial answer");
        assert!(page.messages[1].incomplete);
    }

    #[tokio::test]
    async fn test_stream_error_preserves_partial_content() {
        let (ctx, api, dyn_api) = setup("c-1");
        api.push_stream(scripted_events(vec![
            token("Half an "),
            StreamEvent::Error {
                message: "backend gave up".to_string(),
                code: Some("upstream".to_string()),
                retryable: Some(true),
            },
        ]));

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        let StreamOutcome::Failed { error, partial } = outcome else {
            panic!("expected failure");
        };
        assert!(partial);
        assert!(error.is_retryable());

        let store = ctx.store.lock();
        let page = store.page("c-1").unwrap();
        assert_eq!(page.messages[1].content, "Half an ");
        assert!(page.messages[1].incomplete);
    }

    #[tokio::test]
    async fn test_stream_error_with_no_content_removes_placeholder() {
        let (ctx, api, dyn_api) = setup("c-1");
        api.push_stream(scripted_events(vec![StreamEvent::Error {
            message: "refused".to_string(),
            code: None,
            retryable: Some(false),
        }]));

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            StreamOutcome::Failed { partial: false, .. }
        ));
        let store = ctx.store.lock();
        // Only the user message remains.
        assert_eq!(store.page("c-1").unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_drops_both_optimistic_messages() {
        let (ctx, api, dyn_api) = setup("c-1");
        api.open_stream_errors.lock().push_back(ApiError::Timeout);

        let outcome = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            StreamOutcome::Failed { partial: false, .. }
        ));
        let store = ctx.store.lock();
        assert!(store.page("c-1").unwrap().messages.is_empty());
        assert!(store.active_request("c-1").is_none());
    }

    #[tokio::test]
    async fn test_second_stream_for_same_conversation_is_rejected() {
        let (ctx, _api, dyn_api) = setup("c-1");
        let _held = ctx
            .registry
            .begin("c-1", RequestKind::Stream)
            .unwrap();

        let result = send_stream(&ctx, &dyn_api, "c-1", "hi", SendOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_temp_conversations_never_hit_the_server() {
        let ctx = AppContext::new();
        let api: Arc<dyn ChatApi> = Arc::new(ScriptedApi::new());
        let conv = Conversation::new_temporary("New Chat", "default");

        assert!(
            send_stream(&ctx, &api, &conv.id, "hi", SendOptions::default())
                .await
                .is_err()
        );
        assert!(
            send_batch(&ctx, &api, &conv.id, "hi", SendOptions::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_batch_send_replaces_optimistic_message() {
        let (ctx, api, dyn_api) = setup("c-1");
        let now = Utc::now();
        api.batch_replies.lock().push_back(Ok(super::super::events::BatchReply {
            user_message: Message {
                id: "m-10".to_string(),
                role: MessageRole::User,
                content: "hi".to_string(),
                files: Vec::new(),
                sources: Vec::new(),
                generated_images: Vec::new(),
                created_at: now,
                incomplete: false,
            },
            assistant_message: Message {
                id: "m-11".to_string(),
                role: MessageRole::Assistant,
                content: "hello".to_string(),
                files: Vec::new(),
                sources: Vec::new(),
                generated_images: Vec::new(),
                created_at: now,
                incomplete: false,
            },
        }));

        let reply = send_batch(&ctx, &dyn_api, "c-1", "hi", SendOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.id, "m-11");

        let store = ctx.store.lock();
        let page = store.page("c-1").unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].id, "m-10");
        assert_eq!(page.messages[1].id, "m-11");
        assert!(store.active_request("c-1").is_none());
    }

    #[tokio::test]
    async fn test_batch_failure_drops_optimistic_message() {
        let (ctx, api, dyn_api) = setup("c-1");
        api.batch_replies.lock().push_back(Err(ApiError::Timeout));

        let result = send_batch(&ctx, &dyn_api, "c-1", "hi", SendOptions::default()).await;
        assert!(result.is_err());

        let store = ctx.store.lock();
        assert!(store.page("c-1").unwrap().messages.is_empty());
        assert!(store.active_request("c-1").is_none());
    }
}
