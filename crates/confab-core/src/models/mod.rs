pub mod conversation;
pub mod conversations_store;
pub mod navigation_guard;
pub mod request_registry;
pub mod thinking_trace;

pub use conversation::{Conversation, ConversationPage, Message, MessagePage, MessageRole};
pub use conversations_store::{ActiveRequest, ConversationStore, RequestKind, SharedStore};
pub use navigation_guard::NavigationGuard;
pub use request_registry::{ActiveRequestRegistry, RequestHandle, RequestId};
pub use thinking_trace::{ThinkingState, ThinkingTraceItem, TraceItemKind};
