//! Collaborator interfaces for the hosted identity, database and realtime services.
//!
//! Every sync component receives these as explicit `Arc<dyn ...>` parameters;
//! nothing in the crate reaches for a global client.

mod memory;

pub use memory::{BackendSnapshot, MemoryBackend};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{
    Conversation, ConversationId, MessageId, MessageRow, NewMessage, PresenceRecord, Session,
    UserId, UserProfile,
};

/// Receiving end of a realtime stream.
///
/// Dropping the subscription unsubscribes; the producer notices the closed
/// channel on its next send.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver.
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Wait for the next item. `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an already-delivered item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Poll for the next item, for callers waiting on several subscriptions.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }

    /// Stop receiving. Items already queued are discarded.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

/// Create a connected sender/subscription pair.
pub fn subscription<T>() -> (mpsc::UnboundedSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Subscription::new(rx))
}

/// Authentication state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed,
}

/// Presence channel notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Full state of the channel, sent on subscribe.
    Sync(Vec<PresenceRecord>),
    /// A record was tracked or refreshed.
    Join(PresenceRecord),
    /// A user retracted their record.
    Leave(UserId),
}

/// Kind of row change on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row change delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub row: Value,
}

/// Equality filter on one column of a change-feed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    /// Match rows whose `column` equals `value`.
    pub fn equals(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Check a row against this filter.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

/// Identity provider.
#[async_trait]
pub trait Identity: Send + Sync + std::fmt::Debug {
    /// The signed-in user, if any.
    async fn current_session(&self) -> Result<Option<Session>>;

    /// Stream of authentication changes.
    async fn subscribe_auth(&self) -> Result<Subscription<AuthEvent>>;
}

/// Relational store.
#[async_trait]
pub trait Persistence: Send + Sync + std::fmt::Debug {
    /// Insert a new message row.
    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    /// All messages of a conversation, ascending by creation time.
    async fn query_messages(&self, conversation: &ConversationId) -> Result<Vec<MessageRow>>;

    /// Most recent message of a conversation.
    async fn query_last_message(&self, conversation: &ConversationId) -> Result<Option<MessageRow>>;

    /// Ids of messages not sent by `sender_not`, created strictly after
    /// `created_after`. Its length is the unread count.
    async fn query_unread_ids(
        &self,
        conversation: &ConversationId,
        sender_not: &UserId,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageId>>;

    /// Insert a conversation, or return the existing one for the same pair.
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<Conversation>;

    /// Conversations in which `user` participates.
    async fn query_conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>>;

    /// Look up a user profile.
    async fn query_user(&self, user: &UserId) -> Result<Option<UserProfile>>;
}

/// Managed realtime service: broadcast, presence and change feed.
#[async_trait]
pub trait Realtime: Send + Sync + std::fmt::Debug {
    /// Subscribe to `event` broadcasts on `channel`. Own publishes are echoed back.
    async fn subscribe_broadcast(&self, channel: &str, event: &str) -> Result<Subscription<Value>>;

    /// Publish a broadcast.
    async fn publish_broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()>;

    /// Subscribe to presence changes on `channel`.
    async fn subscribe_presence(&self, channel: &str) -> Result<Subscription<PresenceEvent>>;

    /// Publish or refresh this client's presence record.
    async fn track_presence(&self, channel: &str, record: &PresenceRecord) -> Result<()>;

    /// Retract this client's presence record.
    async fn untrack_presence(&self, channel: &str, user: &UserId) -> Result<()>;

    /// Subscribe to row changes on `table`.
    async fn subscribe_change_feed(
        &self,
        table: &str,
        filter: Option<ChangeFilter>,
    ) -> Result<Subscription<ChangeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_filter() {
        let filter = ChangeFilter::equals("conversation_id", "c1");
        assert!(filter.matches(&json!({ "conversation_id": "c1" })));
        assert!(!filter.matches(&json!({ "conversation_id": "c2" })));
        assert!(!filter.matches(&json!({})));
    }

    #[tokio::test]
    async fn test_subscription_close_discards_queue() {
        let (tx, mut sub) = subscription::<u32>();
        tx.send(1).unwrap();
        sub.close();

        assert!(tx.send(2).is_err());
        assert_eq!(sub.try_recv(), None);
    }
}
