use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::context::AppContext;
use crate::models::conversation::{Conversation, MessagePage, is_temp_id};

use super::chat_api::ChatApi;

/// Replace the conversation list with the first page from the server.
pub async fn refresh_conversation_list(ctx: &AppContext, api: &Arc<dyn ChatApi>) -> Result<()> {
    let page = api.list_conversations(None).await?;
    let count = page.conversations.len();
    ctx.store
        .lock()
        .set_conversations(page.conversations, page.next_cursor);
    debug!(count, "conversation list refreshed");
    Ok(())
}

/// Fetch and append the next page of the conversation list. Returns false
/// when there is no further page.
pub async fn load_more_conversations(ctx: &AppContext, api: &Arc<dyn ChatApi>) -> Result<bool> {
    let Some(cursor) = ctx.store.lock().next_cursor().map(str::to_string) else {
        return Ok(false);
    };
    let page = api.list_conversations(Some(cursor)).await?;
    ctx.store
        .lock()
        .append_conversations(page.conversations, page.next_cursor);
    Ok(true)
}

/// Open a conversation: fetch its record and latest message window, then
/// make it current, unless a newer open intent arrived while the fetch was
/// in flight, in which case the result is cached but focus is left alone.
///
/// Returns the conversation when it became current, `None` when superseded.
pub async fn load_conversation(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    id: &str,
) -> Result<Option<Conversation>> {
    ctx.conversation_guard.begin(id);

    // Temporary conversations exist only locally; nothing to fetch.
    if is_temp_id(id) {
        let mut store = ctx.store.lock();
        let conversation = store.conversation(id).cloned();
        store.set_current(conversation.clone());
        return Ok(conversation);
    }

    let conversation = api.fetch_conversation(id).await?;
    let page = api.fetch_messages(id, None).await?;

    // Cache unconditionally: even a superseded fetch brought back fresh
    // data worth keeping.
    let mut store = ctx.store.lock();
    store.upsert_conversation(conversation.clone());
    store.set_page(id, page);

    if !ctx.conversation_guard.is_current(id) {
        debug!(conv_id = %id, "open superseded by a newer selection");
        return Ok(None);
    }
    store.set_current(Some(conversation.clone()));
    Ok(Some(conversation))
}

/// Fetch older messages for a conversation and prepend them to its cached
/// page. Returns false when the server reports nothing further.
pub async fn load_older_messages(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    conversation_id: &str,
) -> Result<bool> {
    let before = {
        let store = ctx.store.lock();
        let Some(page) = store.page(conversation_id) else {
            return Ok(false);
        };
        if !page.has_more {
            return Ok(false);
        }
        page.next_cursor.clone()
    };

    let older = api.fetch_messages(conversation_id, before).await?;
    let mut store = ctx.store.lock();
    let Some(page) = store.page(conversation_id) else {
        return Ok(false);
    };
    let mut merged = older.messages;
    merged.extend(page.messages.iter().cloned());
    store.set_page(
        conversation_id,
        MessagePage {
            messages: merged,
            total_count: older.total_count,
            has_more: older.has_more,
            next_cursor: older.next_cursor,
        },
    );
    Ok(true)
}

/// Jump to a search hit: open its conversation positioned on the message
/// window around the hit.
///
/// Unlike [`load_conversation`], a superseded jump caches nothing: the
/// fetched window is a partial slice pinned to the hit, and caching it would
/// leave the conversation's page missing its latest messages.
pub async fn jump_to_search_result(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    conversation_id: &str,
    message_id: &str,
) -> Result<bool> {
    ctx.search_guard.begin(message_id);

    let conversation = api.fetch_conversation(conversation_id).await?;
    let window = api.fetch_message_window(conversation_id, message_id).await?;

    if !ctx.search_guard.is_current(message_id) {
        debug!(conv_id = %conversation_id, message_id = %message_id, "search jump superseded");
        return Ok(false);
    }

    let mut store = ctx.store.lock();
    store.upsert_conversation(conversation.clone());
    store.set_page(conversation_id, window);
    store.set_current(Some(conversation));
    ctx.conversation_guard.begin(conversation_id);
    Ok(true)
}

/// Delete a conversation, stopping any live stream for it first. Temporary
/// conversations are removed locally without a server call.
pub async fn delete_conversation(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    id: &str,
) -> Result<()> {
    if ctx.registry.cancel(id) {
        debug!(conv_id = %id, "cancelled live stream before delete");
    }

    if !is_temp_id(id) {
        api.delete_conversation(id).await?;
    }

    let was_current = {
        let mut store = ctx.store.lock();
        let was_current = store.current_id().as_deref() == Some(id);
        store.remove_conversation(id);
        was_current
    };
    if was_current {
        ctx.conversation_guard.clear();
    }
    info!(conv_id = %id, "conversation deleted");
    Ok(())
}

/// Start a fresh local conversation. No server call happens until the first
/// send persists it via [`ensure_persisted`].
pub fn new_conversation(ctx: &AppContext, model: &str) -> Conversation {
    let conversation = Conversation::new_temporary("New conversation", model);
    {
        let mut store = ctx.store.lock();
        store.upsert_conversation(conversation.clone());
        store.set_current(Some(conversation.clone()));
        store.set_page(&conversation.id, MessagePage::default());
    }
    // A brand-new conversation is an explicit "no prior target" action for
    // both guards: any in-flight open or search jump must land as stale.
    ctx.conversation_guard.clear();
    ctx.search_guard.clear();
    ctx.conversation_guard.begin(&conversation.id);
    debug!(conv_id = %conversation.id, "temporary conversation created");
    conversation
}

/// Make sure a conversation exists on the server, creating it when the id
/// is still temporary. Returns the server id; all local state keyed on the
/// temporary id is migrated.
pub async fn ensure_persisted(
    ctx: &AppContext,
    api: &Arc<dyn ChatApi>,
    id: &str,
) -> Result<String> {
    if !is_temp_id(id) {
        return Ok(id.to_string());
    }

    let (title, model) = {
        let store = ctx.store.lock();
        match store.conversation(id) {
            Some(c) => (c.title.clone(), c.model.clone()),
            None => ("New conversation".to_string(), String::new()),
        }
    };

    let created = api.create_conversation(&title, &model).await?;
    let server_id = created.id.clone();
    {
        let mut store = ctx.store.lock();
        let page = store.page(id).cloned().unwrap_or_default();
        let was_current = store.current_id().as_deref() == Some(id);
        store.remove_conversation(id);
        store.upsert_conversation(created.clone());
        store.set_page(&server_id, page);
        if was_current {
            store.set_current(Some(created));
        }
    }
    if ctx.conversation_guard.is_current(id) {
        ctx.conversation_guard.begin(&server_id);
    }
    info!(temp_id = %id, conv_id = %server_id, "conversation persisted");
    Ok(server_id)
}
