//! In-process backend implementing identity, persistence and realtime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};
use tokio::sync::mpsc::UnboundedSender;

use super::{
    subscription, AuthEvent, ChangeEvent, ChangeFilter, ChangeKind, Identity, Persistence,
    PresenceEvent, Realtime, Subscription,
};
use crate::config::tables;
use crate::error::{Error, Result};
use crate::models::{
    Conversation, ConversationId, MessageId, MessageRow, NewMessage, PresenceRecord, Session,
    UserId, UserProfile,
};

/// Serializable contents of a [`MemoryBackend`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSnapshot {
    pub users: Vec<UserProfile>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<NewMessage>,
}

#[derive(Debug, Default)]
struct State {
    session: Option<Session>,
    users: HashMap<UserId, UserProfile>,
    conversations: Vec<Conversation>,
    messages: Vec<NewMessage>,
    auth_subscribers: Vec<UnboundedSender<AuthEvent>>,
    broadcast: HashMap<(String, String), Vec<UnboundedSender<Value>>>,
    presence: HashMap<String, PresenceChannel>,
    feeds: Vec<FeedSubscriber>,
}

#[derive(Debug, Default)]
struct PresenceChannel {
    records: HashMap<UserId, PresenceRecord>,
    subscribers: Vec<UnboundedSender<PresenceEvent>>,
}

#[derive(Debug)]
struct FeedSubscriber {
    table: String,
    filter: Option<ChangeFilter>,
    tx: UnboundedSender<ChangeEvent>,
}

/// Backend that keeps everything in process memory.
///
/// All three collaborator traits are implemented on the same value, so a
/// single `Arc<MemoryBackend>` can be handed to every component. Broadcasts
/// are echoed to the publisher's own subscriptions. Individual operations
/// can be made to fail to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    fail_inserts: AtomicBool,
    fail_publishes: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a backend from a snapshot.
    pub fn from_snapshot(snapshot: BackendSnapshot) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.users = snapshot
                .users
                .into_iter()
                .map(|u| (u.id.clone(), u))
                .collect();
            state.conversations = snapshot.conversations;
            state.messages = snapshot.messages;
        }
        backend
    }

    /// Export persisted data (users, conversations, messages).
    pub fn snapshot(&self) -> BackendSnapshot {
        let state = self.lock();
        let mut users: Vec<_> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        BackendSnapshot {
            users,
            conversations: state.conversations.clone(),
            messages: state.messages.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register or rename a user profile.
    pub fn add_user(&self, profile: UserProfile) {
        self.lock().users.insert(profile.id.clone(), profile);
    }

    /// All registered users.
    pub fn users(&self) -> Vec<UserProfile> {
        self.snapshot().users
    }

    /// Sign `profile` in, registering it if needed.
    pub fn sign_in(&self, profile: UserProfile) {
        let mut state = self.lock();
        state.users.insert(profile.id.clone(), profile.clone());
        state.session = Some(profile.clone());
        let event = AuthEvent::SignedIn(profile);
        state.auth_subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Sign the current user out.
    pub fn sign_out(&self) {
        let mut state = self.lock();
        state.session = None;
        state
            .auth_subscribers
            .retain(|tx| tx.send(AuthEvent::SignedOut).is_ok());
    }

    /// Number of open auth-change subscriptions.
    pub fn auth_subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.auth_subscribers.retain(|tx| !tx.is_closed());
        state.auth_subscribers.len()
    }

    /// Make `insert_message` fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make `publish_broadcast` fail.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Make read queries fail.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    fn check_queries(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Error::transient("query failed"));
        }
        Ok(())
    }

    fn emit_change(state: &mut State, table: &str, kind: ChangeKind, row: Value) {
        state.feeds.retain(|sub| {
            if sub.table != table || !sub.filter.as_ref().map_or(true, |f| f.matches(&row)) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(ChangeEvent {
                    table: table.to_owned(),
                    kind,
                    row: row.clone(),
                })
                .is_ok()
        });
    }
}

fn join_row(state: &State, message: &NewMessage) -> MessageRow {
    MessageRow {
        id: message.id.clone(),
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        sender_name: state.users.get(&message.sender_id).map(|u| u.name.clone()),
        content: message.content.clone(),
        created_at: Some(message.created_at),
    }
}

fn ordered_rows(state: &State, conversation: &ConversationId) -> Vec<MessageRow> {
    let mut rows: Vec<&NewMessage> = state
        .messages
        .iter()
        .filter(|m| &m.conversation_id == conversation)
        .collect();
    rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    rows.into_iter().map(|m| join_row(state, m)).collect()
}

#[async_trait]
impl Identity for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.lock().session.clone())
    }

    async fn subscribe_auth(&self) -> Result<Subscription<AuthEvent>> {
        let (tx, sub) = subscription();
        self.lock().auth_subscribers.push(tx);
        Ok(sub)
    }
}

#[async_trait]
impl Persistence for MemoryBackend {
    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::transient("insert rejected"));
        }
        let mut state = self.lock();
        if state.messages.iter().any(|m| m.id == message.id) {
            return Err(Error::validation(format!("duplicate message id {}", message.id)));
        }
        state.messages.push(message.clone());

        let row = serde_json::to_value(join_row(&state, message))?;
        Self::emit_change(&mut state, tables::MESSAGES, ChangeKind::Insert, row);
        Ok(())
    }

    async fn query_messages(&self, conversation: &ConversationId) -> Result<Vec<MessageRow>> {
        self.check_queries()?;
        Ok(ordered_rows(&self.lock(), conversation))
    }

    async fn query_last_message(&self, conversation: &ConversationId) -> Result<Option<MessageRow>> {
        self.check_queries()?;
        Ok(ordered_rows(&self.lock(), conversation).pop())
    }

    async fn query_unread_ids(
        &self,
        conversation: &ConversationId,
        sender_not: &UserId,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageId>> {
        self.check_queries()?;
        let state = self.lock();
        let ids = state
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation)
            .filter(|m| &m.sender_id != sender_not)
            .filter(|m| created_after.map_or(true, |after| m.created_at > after))
            .map(|m| m.id.clone())
            .collect();
        Ok(ids)
    }

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut state = self.lock();
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.is_between(&conversation.participant_a, &conversation.participant_b))
        {
            return Ok(existing.clone());
        }
        state.conversations.push(conversation.clone());

        let row = serde_json::to_value(conversation)?;
        Self::emit_change(&mut state, tables::CONVERSATIONS, ChangeKind::Insert, row);
        Ok(conversation.clone())
    }

    async fn query_conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>> {
        self.check_queries()?;
        Ok(self
            .lock()
            .conversations
            .iter()
            .filter(|c| c.involves(user))
            .cloned()
            .collect())
    }

    async fn query_user(&self, user: &UserId) -> Result<Option<UserProfile>> {
        self.check_queries()?;
        Ok(self.lock().users.get(user).cloned())
    }
}

#[async_trait]
impl Realtime for MemoryBackend {
    async fn subscribe_broadcast(&self, channel: &str, event: &str) -> Result<Subscription<Value>> {
        let (tx, sub) = subscription();
        self.lock()
            .broadcast
            .entry((channel.to_owned(), event.to_owned()))
            .or_default()
            .push(tx);
        Ok(sub)
    }

    async fn publish_broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(Error::transient("broadcast publish failed"));
        }
        let mut state = self.lock();
        if let Some(subscribers) = state
            .broadcast
            .get_mut(&(channel.to_owned(), event.to_owned()))
        {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe_presence(&self, channel: &str) -> Result<Subscription<PresenceEvent>> {
        let (tx, sub) = subscription();
        let mut state = self.lock();
        let presence = state.presence.entry(channel.to_owned()).or_default();
        let current = presence.records.values().cloned().collect();
        if tx.send(PresenceEvent::Sync(current)).is_ok() {
            presence.subscribers.push(tx);
        }
        Ok(sub)
    }

    async fn track_presence(&self, channel: &str, record: &PresenceRecord) -> Result<()> {
        let mut state = self.lock();
        let presence = state.presence.entry(channel.to_owned()).or_default();
        presence
            .records
            .insert(record.user_id.clone(), record.clone());
        presence
            .subscribers
            .retain(|tx| tx.send(PresenceEvent::Join(record.clone())).is_ok());
        Ok(())
    }

    async fn untrack_presence(&self, channel: &str, user: &UserId) -> Result<()> {
        let mut state = self.lock();
        if let Some(presence) = state.presence.get_mut(channel) {
            if presence.records.remove(user).is_some() {
                presence
                    .subscribers
                    .retain(|tx| tx.send(PresenceEvent::Leave(user.clone())).is_ok());
            }
        }
        Ok(())
    }

    async fn subscribe_change_feed(
        &self,
        table: &str,
        filter: Option<ChangeFilter>,
    ) -> Result<Subscription<ChangeEvent>> {
        let (tx, sub) = subscription();
        self.lock().feeds.push(FeedSubscriber {
            table: table.to_owned(),
            filter,
            tx,
        });
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn new_message(id: &str, sender: &str, at: i64) -> NewMessage {
        NewMessage {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            content: format!("msg {}", id),
            created_at: t(at),
        }
    }

    #[tokio::test]
    async fn test_query_messages_is_ordered_and_joined() {
        let backend = MemoryBackend::new();
        backend.add_user(UserProfile::new("alice", "Alice"));

        backend.insert_message(&new_message("m2", "alice", 20)).await.unwrap();
        backend.insert_message(&new_message("m1", "ghost", 10)).await.unwrap();

        let rows = backend.query_messages(&"c1".into()).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(rows[0].sender_name, None);
        assert_eq!(rows[1].sender_name.as_deref(), Some("Alice"));

        let last = backend.query_last_message(&"c1".into()).await.unwrap();
        assert_eq!(last.map(|r| r.id), Some("m2".into()));
    }

    #[tokio::test]
    async fn test_query_unread_ids() {
        let backend = MemoryBackend::new();
        backend.insert_message(&new_message("m1", "alice", 10)).await.unwrap();
        backend.insert_message(&new_message("m2", "bob", 20)).await.unwrap();
        backend.insert_message(&new_message("m3", "alice", 30)).await.unwrap();

        let c1 = ConversationId::from("c1");
        let all = backend.query_unread_ids(&c1, &"bob".into(), None).await.unwrap();
        assert_eq!(all, vec![MessageId::from("m1"), MessageId::from("m3")]);
        let after = backend
            .query_unread_ids(&c1, &"bob".into(), Some(t(10)))
            .await
            .unwrap();
        assert_eq!(after, vec![MessageId::from("m3")]);
    }

    #[tokio::test]
    async fn test_broadcast_echoes_to_publisher() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_broadcast("c1", "message").await.unwrap();

        backend
            .publish_broadcast("c1", "message", json!({ "id": "m1" }))
            .await
            .unwrap();
        backend
            .publish_broadcast("c2", "message", json!({ "id": "other" }))
            .await
            .unwrap();

        assert_eq!(sub.try_recv(), Some(json!({ "id": "m1" })));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_presence_sync_join_leave() {
        let backend = MemoryBackend::new();
        let record = PresenceRecord::heartbeat("alice", "Alice", t(0));
        backend.track_presence("presence:c1", &record).await.unwrap();

        let mut sub = backend.subscribe_presence("presence:c1").await.unwrap();
        assert_eq!(sub.try_recv(), Some(PresenceEvent::Sync(vec![record.clone()])));

        backend.untrack_presence("presence:c1", &"alice".into()).await.unwrap();
        assert_eq!(sub.try_recv(), Some(PresenceEvent::Leave("alice".into())));

        // Retracting twice does not notify again.
        backend.untrack_presence("presence:c1", &"alice".into()).await.unwrap();
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_change_feed_filter() {
        let backend = MemoryBackend::new();
        let mut all = backend.subscribe_change_feed(tables::MESSAGES, None).await.unwrap();
        let mut other = backend
            .subscribe_change_feed(tables::MESSAGES, Some(ChangeFilter::equals("conversation_id", "c2")))
            .await
            .unwrap();

        backend.insert_message(&new_message("m1", "alice", 0)).await.unwrap();

        let event = all.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.row["id"], "m1");
        assert_eq!(other.try_recv(), None);
    }

    #[tokio::test]
    async fn test_upsert_conversation_reuses_pair() {
        let backend = MemoryBackend::new();
        let first = Conversation {
            id: "c1".into(),
            participant_a: "alice".into(),
            participant_b: "bob".into(),
            created_at: t(0),
        };
        let second = Conversation {
            id: "c2".into(),
            participant_a: "bob".into(),
            participant_b: "alice".into(),
            created_at: t(5),
        };

        assert_eq!(backend.upsert_conversation(&first).await.unwrap(), first);
        assert_eq!(backend.upsert_conversation(&second).await.unwrap(), first);
        assert_eq!(
            backend.query_conversations_for_user(&"bob".into()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_faults() {
        let backend = MemoryBackend::new();
        backend.fail_inserts(true);
        let err = backend.insert_message(&new_message("m1", "a", 0)).await.unwrap_err();
        assert!(err.is_retryable());

        backend.fail_queries(true);
        assert!(backend.query_messages(&"c1".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let backend = MemoryBackend::new();
        backend.add_user(UserProfile::new("alice", "Alice"));
        backend.insert_message(&new_message("m1", "alice", 0)).await.unwrap();

        let restored = MemoryBackend::from_snapshot(backend.snapshot());
        assert_eq!(restored.snapshot(), backend.snapshot());
    }

    #[tokio::test]
    async fn test_auth_events() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_auth().await.unwrap();

        backend.sign_in(UserProfile::new("alice", "Alice"));
        assert!(backend.current_session().await.unwrap().is_some());
        backend.sign_out();

        assert!(matches!(sub.try_recv(), Some(AuthEvent::SignedIn(_))));
        assert_eq!(sub.try_recv(), Some(AuthEvent::SignedOut));
        assert_eq!(backend.current_session().await.unwrap(), None);
    }
}
