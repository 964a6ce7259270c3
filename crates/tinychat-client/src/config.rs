//! Client configuration

use tinychat_core::SessionConfig;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Key-exchange settings
    pub session: SessionConfig,
    /// Default for new conversations; can be changed per conversation
    pub send_typing_indicators: bool,
    /// Acknowledge received edits with `Delivered`
    pub ack_edits: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { session: SessionConfig::default(), send_typing_indicators: true, ack_edits: true }
    }
}
