use std::sync::Arc;

use parking_lot::Mutex;

/// Single-slot intent token: holds the id of the thing the user most
/// recently asked for.
///
/// The pattern, applied independently for conversation selection and
/// search-result jumps:
///
/// 1. On user intent, write the target id into the slot synchronously,
///    before any network I/O starts.
/// 2. After an awaited call returns, compare the slot's current value to
///    the id captured at step 1. A mismatch means a newer intent arrived
///    while this one was in flight; discard the result without touching
///    focused UI state (caching fetched data is still fine).
/// 3. Clear only on an explicit "no target" action. Never clear on
///    completion: a stale completion must still see a mismatch.
///
/// Deliberately simpler than true cancellation: it suppresses *effects* of
/// stale work, which is enough for idempotent read-only fetches. The
/// streaming path uses a real cancellation handle instead because it has
/// server-side effects worth stopping.
#[derive(Clone, Default)]
pub struct NavigationGuard {
    slot: Arc<Mutex<Option<String>>>,
}

impl NavigationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new intent. Must run before the I/O it guards.
    pub fn begin(&self, target: &str) {
        *self.slot.lock() = Some(target.to_string());
    }

    /// Whether `target` is still the most recent intent.
    pub fn is_current(&self, target: &str) -> bool {
        self.slot.lock().as_deref() == Some(target)
    }

    /// Explicit "no target" action (e.g. creating a new conversation).
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    pub fn current(&self) -> Option<String> {
        self.slot.lock().clone()
    }
}
