//! Tunables shared by the sync components.

use std::time::Duration;

/// Default presence heartbeat period.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Default broadcast event name for chat messages.
pub const MESSAGE_EVENT: &str = "message";

/// Display name used when a sender profile cannot be resolved.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Table names on the change feed.
pub mod tables {
    pub const MESSAGES: &str = "messages";
    pub const CONVERSATIONS: &str = "conversations";
}

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How often presence is republished while visible.
    pub heartbeat_interval: Duration,
    /// How long a heartbeat keeps a user online.
    pub presence_ttl: Duration,
    /// Broadcast event name carrying new messages.
    pub message_event: String,
    /// Fallback display name for senders without a profile.
    pub unknown_user_label: String,
    /// Prefix of read-watermark keys in local storage.
    pub watermark_prefix: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT,
            presence_ttl: DEFAULT_HEARTBEAT * 3,
            message_event: MESSAGE_EVENT.to_owned(),
            unknown_user_label: UNKNOWN_USER.to_owned(),
            watermark_prefix: "lastRead".to_owned(),
        }
    }
}

impl ChatConfig {
    /// Presence channel name for a conversation.
    pub fn presence_channel(&self, conversation: &str) -> String {
        format!("presence:{}", conversation)
    }

    /// Local-storage key of a read watermark.
    pub fn watermark_key(&self, viewer: &str, conversation: &str) -> String {
        format!("{}_{}_{}", self.watermark_prefix, viewer, conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.presence_ttl, Duration::from_secs(90));
        assert_eq!(config.message_event, "message");
    }

    #[test]
    fn test_watermark_key() {
        let config = ChatConfig::default();
        assert_eq!(config.watermark_key("u1", "c9"), "lastRead_u1_c9");
        assert_eq!(config.presence_channel("c9"), "presence:c9");
    }
}
