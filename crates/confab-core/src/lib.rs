//! Client-side engine for a streaming chat application: conversation state,
//! live stream consumption, request bookkeeping, navigation race handling,
//! and background server synchronization. No UI and no rendering; the host
//! application observes the store and the sync callbacks.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use config::ClientConfig;
pub use context::AppContext;
pub use error::{ApiError, ApiResult};
