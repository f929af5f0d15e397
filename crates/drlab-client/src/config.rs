use std::time::Duration;

use drlab_shared::constants::{
    DEFAULT_PAGE_SIZE, RECONNECT_DELAY_SECS, WRITE_TIMEOUT_SECS, WS_MESSAGING_PATH,
};

/// Session configuration. Only the API base url is required; everything else
/// has workable defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `http://lab.example.org:8000`
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect_delay: Duration,
    pub page_size: u32,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Websocket endpoint derived from the API base url (http → ws,
    /// https → wss).
    pub fn ws_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{base}{WS_MESSAGING_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_derivation() {
        let config = ClientConfig::new("http://localhost:8000/");
        assert_eq!(config.ws_url(), "ws://localhost:8000/ws/messaging/");

        let config = ClientConfig::new("https://lab.example.org");
        assert_eq!(config.ws_url(), "wss://lab.example.org/ws/messaging/");
    }
}
