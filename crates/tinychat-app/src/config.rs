//! Runtime configuration

use std::time::Duration;

use tinychat_client::ClientConfig;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Protocol settings passed to the client
    pub client: ClientConfig,
    /// How long a send waits for the conversation key
    pub key_wait_timeout: Duration,
    /// Key re-check interval while waiting
    pub key_poll_interval: Duration,
    /// Handshake timer resolution
    pub tick_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            key_wait_timeout: Duration::from_secs(10),
            key_poll_interval: Duration::from_millis(50),
            tick_interval: Duration::from_secs(1),
        }
    }
}
