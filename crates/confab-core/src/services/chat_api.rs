use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::conversation::{Conversation, ConversationPage, MessagePage};

use super::events::{BatchReply, SendOptions, StreamEvent, SyncResponse};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Live event stream for one generation.
pub type EventStream = BoxStream<'static, ApiResult<StreamEvent>>;

/// Supplies the opaque bearer credential for each request. Token issuance
/// and refresh live outside the engine.
pub type TokenProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Client interface to the conversation service.
pub trait ChatApi: Send + Sync + 'static {
    /// One page of the conversation list, newest first.
    fn list_conversations(
        &self,
        cursor: Option<String>,
    ) -> BoxFuture<'static, ApiResult<ConversationPage>>;

    fn fetch_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<Conversation>>;

    /// Latest message window for a conversation, or the window before
    /// `before` when paginating backwards.
    fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<String>,
    ) -> BoxFuture<'static, ApiResult<MessagePage>>;

    /// The message window surrounding one specific message (search jump).
    fn fetch_message_window(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, ApiResult<MessagePage>>;

    fn create_conversation(
        &self,
        title: &str,
        model: &str,
    ) -> BoxFuture<'static, ApiResult<Conversation>>;

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>>;

    /// Single request/response send.
    fn send_batch(
        &self,
        conversation_id: &str,
        text: &str,
        options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<BatchReply>>;

    /// Streaming send; resolves once the stream is open.
    fn open_stream(
        &self,
        conversation_id: &str,
        text: &str,
        options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<EventStream>>;

    /// Conversation totals and timestamps since `since`, or a full snapshot.
    fn sync(
        &self,
        since: Option<DateTime<Utc>>,
        full: bool,
    ) -> BoxFuture<'static, ApiResult<SyncResponse>>;
}

#[derive(Serialize)]
struct SendBody<'a> {
    text: &'a str,
    #[serde(flatten)]
    options: &'a SendOptions,
}

#[derive(Deserialize)]
struct ServerErrorPayload {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    retryable: Option<bool>,
}

/// reqwest-backed [`ChatApi`] implementation.
///
/// Plain calls carry a per-request timeout; the stream request deliberately
/// has no overall deadline; each chunk read is bounded instead, so a long
/// generation is fine but a stalled one is not.
pub struct HttpChatApi {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenProvider,
    request_timeout: Duration,
    stream_read_timeout: Duration,
    conversation_page_size: u32,
    message_page_size: u32,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig, tokens: TokenProvider) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(ApiError::from)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            request_timeout: config.request_timeout(),
            stream_read_timeout: config.stream_read_timeout(),
            conversation_page_size: config.conversation_page_size,
            message_page_size: config.message_page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.url(path))
            .bearer_auth((self.tokens)())
            .timeout(self.request_timeout)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .bearer_auth((self.tokens)())
            .timeout(self.request_timeout)
    }
}

/// Map a non-success response to the server error taxonomy. The server's
/// explicit `retryable` flag wins; otherwise 5xx is assumed transient.
async fn check_status(response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ServerErrorPayload>(&body) {
        Ok(payload) => Err(ApiError::Server {
            code: payload.code,
            message: payload.message,
            retryable: payload.retryable.unwrap_or(status.is_server_error()),
        }),
        Err(_) => Err(ApiError::Server {
            code: Some(status.as_u16().to_string()),
            message: format!("request failed with status {status}"),
            retryable: status.is_server_error(),
        }),
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
    let response = check_status(response).await?;
    let body = response.text().await.map_err(ApiError::from)?;
    Ok(serde_json::from_str(&body)?)
}

/// Decode one line of the SSE-style stream body. Comments, blank lines and
/// non-data fields yield nothing; a malformed data payload is logged and
/// dropped rather than killing the stream.
fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(error) => {
            warn!(%error, "dropping malformed stream event");
            None
        }
    }
}

/// Accumulates raw stream bytes and yields complete lines.
///
/// Network chunk boundaries fall anywhere, including inside a multi-byte
/// UTF-8 codepoint, so decoding happens per complete line rather than per
/// chunk.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.bytes.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.bytes.drain(..=pos).collect();
            lines.push(
                String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string(),
            );
        }
        lines
    }

    /// Trailing data without a newline, e.g. when the server closes right
    /// after the final event.
    fn flush(&mut self) -> Option<String> {
        if self.bytes.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.bytes).trim_end().to_string();
        self.bytes.clear();
        Some(line)
    }
}

/// Turn a streaming response body into ordered [`StreamEvent`]s. Each chunk
/// read is bounded by `read_timeout`; exceeding it surfaces as a retryable
/// timeout, distinct from user cancellation.
fn sse_events(response: reqwest::Response, read_timeout: Duration) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        loop {
            let chunk = match tokio::time::timeout(read_timeout, bytes.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(error))) => {
                    yield Err(ApiError::from(error));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(ApiError::Timeout);
                    return;
                }
            };
            for line in buffer.push(&chunk) {
                if let Some(event) = parse_event_line(&line) {
                    yield Ok(event);
                }
            }
        }
        if let Some(line) = buffer.flush()
            && let Some(event) = parse_event_line(&line)
        {
            yield Ok(event);
        }
    })
}

impl ChatApi for HttpChatApi {
    fn list_conversations(
        &self,
        cursor: Option<String>,
    ) -> BoxFuture<'static, ApiResult<ConversationPage>> {
        let mut request = self
            .get("/conversations")
            .query(&[("limit", self.conversation_page_size)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn fetch_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<Conversation>> {
        let request = self.get(&format!("/conversations/{id}"));
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<String>,
    ) -> BoxFuture<'static, ApiResult<MessagePage>> {
        let mut request = self
            .get(&format!("/conversations/{conversation_id}/messages"))
            .query(&[("limit", self.message_page_size)]);
        if let Some(before) = before {
            request = request.query(&[("before", before)]);
        }
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn fetch_message_window(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> BoxFuture<'static, ApiResult<MessagePage>> {
        let request = self
            .get(&format!("/conversations/{conversation_id}/messages"))
            .query(&[("around", message_id)])
            .query(&[("limit", self.message_page_size)]);
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn create_conversation(
        &self,
        title: &str,
        model: &str,
    ) -> BoxFuture<'static, ApiResult<Conversation>> {
        let request = self
            .post("/conversations")
            .json(&serde_json::json!({ "title": title, "model": model }));
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn delete_conversation(&self, id: &str) -> BoxFuture<'static, ApiResult<()>> {
        let request = self
            .http
            .delete(self.url(&format!("/conversations/{id}")))
            .bearer_auth((self.tokens)())
            .timeout(self.request_timeout);
        Box::pin(async move {
            check_status(request.send().await?).await?;
            Ok(())
        })
    }

    fn send_batch(
        &self,
        conversation_id: &str,
        text: &str,
        options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<BatchReply>> {
        let request = self
            .post(&format!("/conversations/{conversation_id}/messages"))
            .json(&SendBody {
                text,
                options: &options,
            });
        Box::pin(async move { decode_json(request.send().await?).await })
    }

    fn open_stream(
        &self,
        conversation_id: &str,
        text: &str,
        options: SendOptions,
    ) -> BoxFuture<'static, ApiResult<EventStream>> {
        // No overall deadline here: the per-chunk timeout below bounds a
        // stalled stream without capping a long generation.
        let request = self
            .http
            .post(self.url(&format!("/conversations/{conversation_id}/messages/stream")))
            .bearer_auth((self.tokens)())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&SendBody {
                text,
                options: &options,
            });
        let read_timeout = self.stream_read_timeout;
        Box::pin(async move {
            let response = check_status(request.send().await?).await?;
            Ok(sse_events(response, read_timeout))
        })
    }

    fn sync(
        &self,
        since: Option<DateTime<Utc>>,
        full: bool,
    ) -> BoxFuture<'static, ApiResult<SyncResponse>> {
        let mut request = self.get("/sync").query(&[("full", full)]);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        Box::pin(async move { decode_json(request.send().await?).await })
    }
}
