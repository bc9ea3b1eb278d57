use std::time::Duration;

use serde::Deserialize;

/// Engine configuration. Hosts usually deserialize this from their own
/// settings file; every field has a sensible default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the conversation service.
    pub base_url: String,
    /// Budget for a plain request/response call (send, list, sync).
    pub request_timeout_secs: u64,
    /// Budget for each individual chunk read on a live event stream.
    /// A stream as a whole has no overall deadline.
    pub stream_read_timeout_secs: u64,
    /// Interval between periodic sync ticks.
    pub sync_interval_secs: u64,
    /// Every Nth tick runs as a full snapshot sync; only a full snapshot can
    /// reveal conversations deleted from another device.
    pub full_sync_every: u32,
    /// Page size for conversation list fetches.
    pub conversation_page_size: u32,
    /// Page size for message window fetches.
    pub message_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            stream_read_timeout_secs: 60,
            sync_interval_secs: 30,
            full_sync_every: 5,
            conversation_page_size: 50,
            message_page_size: 50,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_read_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url": "https://chat.example.com", "sync_interval_secs": 10}"#)
                .unwrap();
        assert_eq!(config.base_url, "https://chat.example.com");
        assert_eq!(config.sync_interval(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
