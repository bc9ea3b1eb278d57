use serde::{Deserialize, Serialize};

use crate::services::events::StreamEvent;

/// Display label for the singleton thinking entry.
const THINKING_LABEL: &str = "Thinking";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceItemKind {
    Thinking,
    Tool,
}

/// One entry in the trace of what the assistant did while generating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingTraceItem {
    pub kind: TraceItemKind,
    pub label: String,
    #[serde(default)]
    pub detail: Option<String>,
    pub completed: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate state of the thinking/tool phase of one streaming response.
///
/// Folded one event at a time by [`ThinkingState::apply`]; callers must
/// treat that as the authoritative sequencing function. The trace holds at
/// most one `Thinking` item at any time: it is a singleton mutated in
/// place, never appended. While streaming, tool items are inserted *before*
/// the thinking item so the "still working" indicator stays last for
/// auto-scroll; [`ThinkingState::finalize`] reorders thinking-first for
/// readability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingState {
    pub is_thinking: bool,
    pub active_tool: Option<String>,
    pub active_tool_detail: Option<String>,
    /// Tools that have finished, in completion order, deduplicated.
    pub completed_tools: Vec<String>,
    pub trace: Vec<ThinkingTraceItem>,
}

impl ThinkingState {
    /// Fold one incremental event into the state. Token events only flip
    /// `is_thinking`; content accumulation happens in the message service.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Thinking { text } => self.apply_thinking(text),
            StreamEvent::ToolStart {
                tool,
                detail,
                metadata,
            } => self.apply_tool_start(tool, detail.as_deref(), metadata.as_ref()),
            StreamEvent::ToolDetail { tool, detail } => self.apply_tool_detail(tool, detail),
            StreamEvent::ToolEnd { tool } => self.apply_tool_end(tool),
            StreamEvent::Token { .. } => self.note_token(),
            _ => {}
        }
    }

    /// Upsert the singleton thinking item. The server sends cumulative
    /// thinking text, so the detail is replaced, not appended.
    fn apply_thinking(&mut self, text: &str) {
        self.is_thinking = true;
        if let Some(item) = self
            .trace
            .iter_mut()
            .find(|item| item.kind == TraceItemKind::Thinking)
        {
            item.detail = Some(text.to_string());
            item.completed = false;
        } else {
            self.trace.push(ThinkingTraceItem {
                kind: TraceItemKind::Thinking,
                label: THINKING_LABEL.to_string(),
                detail: Some(text.to_string()),
                completed: false,
                metadata: None,
            });
        }
    }

    fn apply_tool_start(
        &mut self,
        tool: &str,
        detail: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) {
        let item = ThinkingTraceItem {
            kind: TraceItemKind::Tool,
            label: tool.to_string(),
            detail: detail.map(str::to_string),
            completed: false,
            metadata: metadata.cloned(),
        };

        // The thinking item has yielded to tool use; insert the tool item
        // before it so the thinking indicator stays last while streaming.
        if let Some(pos) = self
            .trace
            .iter()
            .position(|item| item.kind == TraceItemKind::Thinking)
        {
            self.trace[pos].completed = true;
            self.trace.insert(pos, item);
        } else {
            self.trace.push(item);
        }

        self.is_thinking = false;
        self.active_tool = Some(tool.to_string());
        self.active_tool_detail = detail.map(str::to_string);
    }

    /// Update the first incomplete tool item with a matching label. A detail
    /// arriving after the tool completed is dropped, not an error.
    fn apply_tool_detail(&mut self, tool: &str, detail: &str) {
        if let Some(item) = self
            .trace
            .iter_mut()
            .find(|item| item.kind == TraceItemKind::Tool && !item.completed && item.label == tool)
        {
            item.detail = Some(detail.to_string());
            if self.active_tool.as_deref() == Some(tool) {
                self.active_tool_detail = Some(detail.to_string());
            }
        }
    }

    fn apply_tool_end(&mut self, tool: &str) {
        if let Some(item) = self
            .trace
            .iter_mut()
            .find(|item| item.kind == TraceItemKind::Tool && !item.completed && item.label == tool)
        {
            item.completed = true;
            if !self.completed_tools.iter().any(|t| t == tool) {
                self.completed_tools.push(tool.to_string());
            }
            if self.active_tool.as_deref() == Some(tool) {
                self.active_tool = None;
                self.active_tool_detail = None;
            }
        }
    }

    /// Tokens imply generation has moved past the thinking/tool phase for
    /// this chunk. A later thinking event may re-enter.
    pub fn note_token(&mut self) {
        self.is_thinking = false;
    }

    /// Freeze the trace for display: thinking entries first, then tool
    /// entries, both in original relative order, everything completed.
    ///
    /// Returns `false` when there is nothing worth rendering and the caller
    /// should skip the disclosure entirely.
    pub fn finalize(&mut self) -> bool {
        self.is_thinking = false;
        self.active_tool = None;
        self.active_tool_detail = None;

        let (mut reordered, tools): (Vec<_>, Vec<_>) = self
            .trace
            .drain(..)
            .partition(|item| item.kind == TraceItemKind::Thinking);
        reordered.extend(tools);
        for item in &mut reordered {
            item.completed = true;
        }
        self.trace = reordered;

        !self.trace.is_empty() || !self.completed_tools.is_empty()
    }
}
