//! Ordered, deduplicated message set for one open conversation.

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_json::Value;

use crate::{
    backend::Subscription,
    client::ChatClientInner,
    error::{Error, Result},
    models::{ConversationId, Message, MessageId, NewMessage, Session},
};

/// Outcome of applying one live payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new message was merged.
    Appended(Message),
    /// The message was already present (typically our own echo).
    Duplicate(MessageId),
    /// The payload failed validation and was discarded.
    Dropped(String),
}

/// Cloneable switch that tears a store down from outside its owner.
///
/// Results of requests that complete after the switch is flipped are ignored.
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    /// Mark the store closed.
    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check whether the store is still live.
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Messages of one conversation, merged from history, live broadcasts and
/// local sends.
///
/// Iteration order is always `(created_at, id)` ascending and every id
/// appears once, whatever order the sources deliver in.
#[derive(Debug)]
pub struct MessageStore {
    client: Arc<ChatClientInner>,
    conversation_id: ConversationId,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    live: Option<Subscription<Value>>,
    liveness: CloseHandle,
}

impl MessageStore {
    /// Create a detached store. Call [`connect`](Self::connect) and
    /// [`refresh`](Self::refresh), or use [`open`](Self::open).
    pub(crate) fn new(client: Arc<ChatClientInner>, conversation_id: ConversationId) -> Self {
        Self {
            client,
            conversation_id,
            messages: Vec::new(),
            ids: HashSet::new(),
            live: None,
            liveness: CloseHandle(Arc::new(AtomicBool::new(true))),
        }
    }

    /// Subscribe to live messages, then load persisted history.
    ///
    /// Subscribing first means nothing sent during the history fetch is
    /// missed; overlap between the two sources is removed by id.
    pub(crate) async fn open(
        client: Arc<ChatClientInner>,
        conversation_id: ConversationId,
    ) -> Result<Self> {
        let mut store = Self::new(client, conversation_id);
        store.connect().await?;
        store.refresh().await?;
        Ok(store)
    }

    /// Establish the live broadcast subscription.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_live()?;
        let sub = self
            .client
            .realtime
            .subscribe_broadcast(
                self.conversation_id.as_str(),
                &self.client.config.message_event,
            )
            .await
            .map_err(|e| {
                log::error!("subscribe to {} failed: {}", self.conversation_id, e);
                e
            })?;

        if !self.liveness.is_live() {
            log::debug!("{} closed while subscribing", self.conversation_id);
            return Err(Error::Closed);
        }
        log::debug!("connected to channel {}", self.conversation_id);
        self.live = Some(sub);
        Ok(())
    }

    /// Fetch the full persisted history and merge it in.
    ///
    /// Returns how many messages were new to the store.
    pub async fn refresh(&mut self) -> Result<usize> {
        self.ensure_live()?;
        let rows = self
            .client
            .persistence
            .query_messages(&self.conversation_id)
            .await
            .map_err(|e| {
                log::error!("fetch history of {} failed: {}", self.conversation_id, e);
                e
            })?;

        if !self.liveness.is_live() {
            log::debug!("discarding history of closed {}", self.conversation_id);
            return Ok(0);
        }

        let now = self.client.clock.now();
        let label = self.client.config.unknown_user_label.clone();
        let fetched = rows.len();
        let mut added = 0;
        for row in rows {
            if self.insert(row.into_message(&label, now)) {
                added += 1;
            }
        }

        log::debug!(
            "merged history of {}: {} fetched, {} new",
            self.conversation_id,
            fetched,
            added
        );
        Ok(added)
    }

    /// Merge one message. Returns `false` if its id is already present or the
    /// store is closed.
    pub fn append(&mut self, incoming: Message) -> bool {
        if !self.liveness.is_live() {
            return false;
        }
        let id = incoming.id.clone();
        let added = self.insert(incoming);
        if !added {
            log::debug!("message {} already present, skipping", id);
        }
        added
    }

    /// Validate a raw broadcast payload and merge it.
    pub fn apply_payload(&mut self, payload: &Value) -> StoreEvent {
        match Message::from_payload(payload) {
            Ok(msg) => {
                let id = msg.id.clone();
                if self.append(msg.clone()) {
                    StoreEvent::Appended(msg)
                } else {
                    StoreEvent::Duplicate(id)
                }
            }
            Err(e) => {
                log::warn!("dropping payload on {}: {}", self.conversation_id, e);
                StoreEvent::Dropped(e.to_string())
            }
        }
    }

    /// Wait for the next live payload and merge it.
    ///
    /// Returns `None` once the store is closed or the channel ends.
    pub async fn next_event(&mut self) -> Option<StoreEvent> {
        let payload = self.live.as_mut()?.recv().await;
        if !self.liveness.is_live() {
            self.live = None;
            return None;
        }
        match payload {
            Some(payload) => Some(self.apply_payload(&payload)),
            None => {
                log::debug!("channel {} closed by server", self.conversation_id);
                self.live = None;
                None
            }
        }
    }

    /// Merge every payload that has already arrived, without waiting.
    pub fn drain_pending(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Some(payload) = self.live.as_mut().and_then(|s| s.try_recv()) {
            events.push(self.apply_payload(&payload));
        }
        events
    }

    /// Send as the current session user.
    pub async fn send(&mut self, content: &str) -> Result<Message> {
        let session = self.client.require_session().await?;
        self.send_as(content, &session).await
    }

    /// Persist, show and broadcast a new message from `author`.
    ///
    /// The row is written before anything is broadcast; if the write fails
    /// the optimistic local copy is removed again and the error returned. A
    /// failed broadcast is only logged: the message is durable and other
    /// clients pick it up on their next history fetch.
    pub async fn send_as(&mut self, content: &str, author: &Session) -> Result<Message> {
        self.ensure_live()?;
        if !self.is_connected() {
            return Err(Error::transient("not connected"));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::validation("message content cannot be empty"));
        }

        let message = Message {
            id: MessageId::generate(),
            content: content.to_owned(),
            user: author.as_author(),
            created_at: self.client.clock.now(),
        };
        let row = NewMessage {
            id: message.id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: author.id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
        };

        self.insert(message.clone());
        if let Err(e) = self.client.persistence.insert_message(&row).await {
            log::error!("storing message {} failed: {}", message.id, e);
            self.remove(&message.id);
            return Err(e);
        }

        let payload = message.to_payload()?;
        if let Err(e) = self
            .client
            .realtime
            .publish_broadcast(
                self.conversation_id.as_str(),
                &self.client.config.message_event,
                payload,
            )
            .await
        {
            log::warn!("broadcast of {} failed: {}", message.id, e);
        }

        Ok(message)
    }

    /// Unsubscribe from the live channel. History stays readable.
    pub fn close(&mut self) {
        self.liveness.close();
        if let Some(mut sub) = self.live.take() {
            sub.close();
            log::debug!("cleaning up channel {}", self.conversation_id);
        }
    }

    /// Handle for closing this store from elsewhere.
    pub fn close_handle(&self) -> CloseHandle {
        self.liveness.clone()
    }

    /// Conversation this store belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Whether the live subscription is established.
    pub fn is_connected(&self) -> bool {
        self.live.is_some() && self.liveness.is_live()
    }

    /// Messages in `(created_at, id)` order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        self.messages.iter()
    }

    /// Messages as a slice in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Check whether `id` is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check whether the conversation has no messages yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.liveness.is_live() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn insert(&mut self, msg: Message) -> bool {
        if !self.ids.insert(msg.id.clone()) {
            return false;
        }
        let pos = self
            .messages
            .binary_search_by(|m| m.sort_key().cmp(&msg.sort_key()))
            .unwrap_or_else(|p| p);
        self.messages.insert(pos, msg);
        true
    }

    fn remove(&mut self, id: &MessageId) {
        if self.ids.remove(id) {
            self.messages.retain(|m| &m.id != id);
        }
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Persistence, Realtime};
    use crate::clock::ManualClock;
    use crate::models::{Author, UserProfile};
    use crate::ChatClient;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn setup() -> (Arc<MemoryBackend>, Arc<ManualClock>, ChatClient) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(t(0)));
        backend.sign_in(UserProfile::new("bob", "Bob"));
        let client = ChatClient::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        (backend, clock, client)
    }

    fn msg(id: &str, at: i64) -> Message {
        Message {
            id: id.into(),
            content: format!("content {}", id),
            user: Author::new("alice", "Alice"),
            created_at: t(at),
        }
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_append_dedupes_and_orders() {
        let (_backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();

        assert!(store.append(msg("m3", 30)));
        assert!(store.append(msg("m1", 10)));
        assert!(!store.append(msg("m1", 10)));
        assert!(store.append(msg("m2", 20)));
        assert!(!store.append(msg("m3", 30)));

        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_open_merges_history_and_live() {
        let (backend, _clock, client) = setup();
        backend.add_user(UserProfile::new("alice", "Alice"));
        backend
            .insert_message(&NewMessage {
                id: "h1".into(),
                conversation_id: "c1".into(),
                sender_id: "alice".into(),
                content: "old".into(),
                created_at: t(5),
            })
            .await
            .unwrap();

        let mut store = client.open_conversation("c1").await.unwrap();
        assert_eq!(ids(&store), vec!["h1"]);
        assert_eq!(store.messages()[0].sender_name(), "Alice");

        // A live copy of a fetched message is a duplicate.
        let echo = store.messages()[0].to_payload().unwrap();
        backend.publish_broadcast("c1", "message", echo).await.unwrap();
        backend
            .publish_broadcast("c1", "message", msg("l1", 1).to_payload().unwrap())
            .await
            .unwrap();

        let events = store.drain_pending();
        assert_eq!(events[0], StoreEvent::Duplicate("h1".into()));
        assert!(matches!(events[1], StoreEvent::Appended(_)));
        assert_eq!(ids(&store), vec!["l1", "h1"]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let (_backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();

        let event = store.apply_payload(&json!({ "id": "x", "user": { "name": "A" } }));
        assert!(matches!(event, StoreEvent::Dropped(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_send_then_echo_keeps_one_copy() {
        let (backend, clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();
        clock.set(t(100));

        let sent = store.send("  hello ").await.unwrap();
        assert_eq!(sent.content, "hello");
        assert_eq!(sent.created_at, t(100));
        assert_eq!(store.len(), 1);

        let echoed = store.next_event().await.unwrap();
        assert_eq!(echoed, StoreEvent::Duplicate(sent.id.clone()));
        assert_eq!(store.len(), 1);

        let rows = backend.query_messages(&"c1".into()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_send_rolls_back_when_persistence_fails() {
        let (backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();
        backend.fail_inserts(true);

        let err = store.send("hello").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.is_empty());
        // Nothing was broadcast either.
        assert!(store.drain_pending().is_empty());
    }

    #[tokio::test]
    async fn test_send_survives_broadcast_failure() {
        let (backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();
        backend.fail_publishes(true);

        let sent = store.send("hello").await.unwrap();
        assert!(store.contains(&sent.id));
        assert_eq!(backend.query_messages(&"c1".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_validation_and_auth() {
        let (backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();

        let err = store.send("   ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        backend.sign_out();
        let err = store.send("hello").await.unwrap_err();
        assert!(err.is_auth_error());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_merging() {
        let (backend, _clock, client) = setup();
        let mut store = client.open_conversation("c1").await.unwrap();
        store.append(msg("m1", 1));

        let handle = store.close_handle();
        handle.close();
        backend
            .publish_broadcast("c1", "message", msg("m2", 2).to_payload().unwrap())
            .await
            .unwrap();

        assert_eq!(store.next_event().await, None);
        assert!(!store.is_connected());
        assert!(!store.append(msg("m3", 3)));
        assert_eq!(store.refresh().await.unwrap_err().to_string(), "Component closed");
        assert_eq!(ids(&store), vec!["m1"]);

        let session = UserProfile::new("bob", "Bob");
        assert!(matches!(store.send_as("hi", &session).await, Err(Error::Closed)));
    }
}
