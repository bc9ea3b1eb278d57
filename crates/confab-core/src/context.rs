use crate::models::conversations_store::{ConversationStore, SharedStore};
use crate::models::navigation_guard::NavigationGuard;
use crate::models::request_registry::ActiveRequestRegistry;

/// Explicit wiring for one engine instance.
///
/// Constructed once at startup and handed to every component that needs it.
/// Nothing in the engine is ambient global state, so tests (and a second
/// window, if it ever comes to that) can run fully independent instances.
#[derive(Clone)]
pub struct AppContext {
    pub store: SharedStore,
    pub registry: ActiveRequestRegistry,
    /// Most recent conversation the user asked to open.
    pub conversation_guard: NavigationGuard,
    /// Most recent search hit the user asked to jump to.
    pub search_guard: NavigationGuard,
}

impl AppContext {
    pub fn new() -> Self {
        let store = ConversationStore::shared();
        Self {
            registry: ActiveRequestRegistry::new(store.clone()),
            store,
            conversation_guard: NavigationGuard::new(),
            search_guard: NavigationGuard::new(),
        }
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}
