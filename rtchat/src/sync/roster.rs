//! Sidebar aggregation: one summary row per conversation of the viewer.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::Poll;

use crate::{
    backend::{AuthEvent, ChangeEvent, ChangeKind, PresenceEvent, Subscription},
    client::ChatClientInner,
    config::tables,
    error::Result,
    models::{
        Conversation, ConversationId, ConversationSummary, MessageRow, PresenceRecord, Session,
        UserId, UserProfile,
    },
    sync::unread::{IncomingMessage, UnreadAccounting},
};

/// Preview shown for conversations without messages.
pub const EMPTY_PREVIEW: &str = "Start chatting";

/// What a change-feed event did to the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    /// A message updated the preview and unread count of a conversation.
    MessageApplied(ConversationId),
    /// A new conversation involving the viewer appeared.
    ConversationAdded(ConversationId),
    /// The other participant of a conversation came online or went offline.
    PresenceChanged(ConversationId),
}

enum Incoming {
    Change(ChangeEvent),
    Presence(ConversationId, PresenceEvent),
    Closed(&'static str),
}

#[derive(Debug, Clone)]
struct Entry {
    conversation: Conversation,
    other: UserProfile,
    last: Option<MessageRow>,
}

impl Entry {
    fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.last.as_ref().and_then(|row| row.created_at)
    }
}

/// Most recent activity first; conversations without messages after all
/// others, newest conversation first.
fn sidebar_order(a: &Entry, b: &Entry) -> Ordering {
    match (a.last_message_at(), b.last_message_at()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.conversation.created_at.cmp(&a.conversation.created_at),
    }
    .then_with(|| a.conversation.id.cmp(&b.conversation.id))
}

/// Conversation list of one viewer, kept current from the change feed and
/// the presence channel of every listed conversation.
#[derive(Debug)]
pub struct ConversationRoster {
    client: Arc<ChatClientInner>,
    viewer: Session,
    entries: Vec<Entry>,
    presence: HashMap<UserId, PresenceRecord>,
    unread: UnreadAccounting,
    message_feed: Option<Subscription<ChangeEvent>>,
    conversation_feed: Option<Subscription<ChangeEvent>>,
    presence_feeds: Vec<(ConversationId, Subscription<PresenceEvent>)>,
}

impl ConversationRoster {
    pub(crate) fn new(client: Arc<ChatClientInner>, viewer: Session) -> Self {
        let unread = UnreadAccounting::new(client.clone(), viewer.clone());
        Self {
            client,
            viewer,
            entries: Vec::new(),
            presence: HashMap::new(),
            unread,
            message_feed: None,
            conversation_feed: None,
            presence_feeds: Vec::new(),
        }
    }

    /// Subscribe to the change feeds, then load every conversation of the viewer.
    pub async fn load(&mut self) -> Result<()> {
        self.subscribe().await?;
        self.refresh().await
    }

    /// Rebuild all rows from persistence.
    pub async fn refresh(&mut self) -> Result<()> {
        let conversations = self
            .client
            .persistence
            .query_conversations_for_user(&self.viewer.id)
            .await
            .map_err(|e| {
                log::error!("loading conversations of {} failed: {}", self.viewer.id, e);
                e
            })?;

        let mut entries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            if let Some(entry) = self.hydrate(conversation).await? {
                entries.push(entry);
            }
        }
        entries.sort_by(sidebar_order);
        log::debug!("roster of {} has {} conversations", self.viewer.id, entries.len());
        self.entries = entries;

        let ids: Vec<_> = self.entries.iter().map(|e| e.conversation.id.clone()).collect();
        for id in &ids {
            self.watch_presence(id).await?;
        }
        Ok(())
    }

    async fn watch_presence(&mut self, conversation: &ConversationId) -> Result<()> {
        if self.presence_feeds.iter().any(|(id, _)| id == conversation) {
            return Ok(());
        }
        let channel = self.client.config.presence_channel(conversation.as_str());
        let feed = self.client.realtime.subscribe_presence(&channel).await?;
        self.presence_feeds.push((conversation.clone(), feed));
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        if self.message_feed.is_none() {
            self.message_feed = Some(
                self.client
                    .realtime
                    .subscribe_change_feed(tables::MESSAGES, None)
                    .await?,
            );
        }
        if self.conversation_feed.is_none() {
            self.conversation_feed = Some(
                self.client
                    .realtime
                    .subscribe_change_feed(tables::CONVERSATIONS, None)
                    .await?,
            );
        }
        Ok(())
    }

    async fn hydrate(&mut self, conversation: Conversation) -> Result<Option<Entry>> {
        let other_id = match conversation.other_participant(&self.viewer.id) {
            Some(id) => id.clone(),
            None => {
                log::warn!("{} does not involve {}, skipping", conversation.id, self.viewer.id);
                return Ok(None);
            }
        };

        let persistence = &self.client.persistence;
        let other = match persistence.query_user(&other_id).await? {
            Some(profile) => profile,
            None => {
                log::debug!("no profile for {}", other_id);
                UserProfile::new(other_id, self.client.config.unknown_user_label.clone())
            }
        };
        let last = persistence.query_last_message(&conversation.id).await?;
        self.unread.recount(&conversation.id).await?;

        Ok(Some(Entry {
            conversation,
            other,
            last,
        }))
    }

    /// Apply a new message row.
    ///
    /// Rows for conversations outside the roster are ignored.
    pub async fn on_message_row(&mut self, row: MessageRow) -> Result<bool> {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.conversation.id == row.conversation_id)
        else {
            return Ok(false);
        };

        let now = self.client.clock.now();
        let incoming = IncomingMessage::from_row(&row, now);
        let newer = match &entry.last {
            Some(last) => {
                let current = (last.created_at.unwrap_or(now), &last.id);
                (incoming.created_at, &row.id) > current
            }
            None => true,
        };
        if newer {
            entry.last = Some(MessageRow {
                created_at: Some(incoming.created_at),
                ..row
            });
        }

        self.unread.on_message(&incoming).await?;
        self.entries.sort_by(sidebar_order);
        Ok(true)
    }

    /// Apply a new conversation row.
    pub async fn on_conversation_row(&mut self, conversation: Conversation) -> Result<bool> {
        if !conversation.involves(&self.viewer.id) || self.contains(&conversation.id) {
            return Ok(false);
        }
        let Some(entry) = self.hydrate(conversation).await? else {
            return Ok(false);
        };
        let id = entry.conversation.id.clone();
        self.entries.push(entry);
        self.entries.sort_by(sidebar_order);
        self.watch_presence(&id).await?;
        Ok(true)
    }

    /// Apply a presence event from the channel of `conversation`.
    ///
    /// Returns whether the other participant's online flag changed.
    pub fn on_presence_event(&mut self, conversation: &ConversationId, event: &PresenceEvent) -> bool {
        let Some(other) = self
            .entries
            .iter()
            .find(|e| &e.conversation.id == conversation)
            .map(|e| e.other.id.clone())
        else {
            return false;
        };

        let before = self.is_online(&other);
        match event {
            PresenceEvent::Sync(records) => match records.iter().find(|r| r.user_id == other) {
                Some(record) => {
                    self.presence.insert(other.clone(), record.clone());
                }
                None => {
                    self.presence.remove(&other);
                }
            },
            PresenceEvent::Join(record) if record.user_id == other => {
                self.presence.insert(other.clone(), record.clone());
            }
            PresenceEvent::Leave(user) if *user == other => {
                self.presence.remove(&other);
            }
            _ => {}
        }
        before != self.is_online(&other)
    }

    async fn apply_change(&mut self, change: ChangeEvent) -> Result<Option<RosterEvent>> {
        if change.kind != ChangeKind::Insert {
            return Ok(None);
        }
        match change.table.as_str() {
            tables::MESSAGES => {
                let row: MessageRow = match serde_json::from_value(change.row) {
                    Ok(row) => row,
                    Err(e) => {
                        log::warn!("dropping malformed message row: {}", e);
                        return Ok(None);
                    }
                };
                let conversation = row.conversation_id.clone();
                Ok(self
                    .on_message_row(row)
                    .await?
                    .then_some(RosterEvent::MessageApplied(conversation)))
            }
            tables::CONVERSATIONS => {
                let conversation: Conversation = match serde_json::from_value(change.row) {
                    Ok(conversation) => conversation,
                    Err(e) => {
                        log::warn!("dropping malformed conversation row: {}", e);
                        return Ok(None);
                    }
                };
                let id = conversation.id.clone();
                Ok(self
                    .on_conversation_row(conversation)
                    .await?
                    .then_some(RosterEvent::ConversationAdded(id)))
            }
            _ => Ok(None),
        }
    }

    /// Wait for the next change that affects the roster.
    ///
    /// Returns `Ok(None)` once both change feeds are closed.
    pub async fn next_event(&mut self) -> Result<Option<RosterEvent>> {
        loop {
            if self.message_feed.is_none() && self.conversation_feed.is_none() {
                return Ok(None);
            }
            let incoming = tokio::select! {
                change = recv_feed(&mut self.message_feed), if self.message_feed.is_some() => {
                    change.map_or(Incoming::Closed(tables::MESSAGES), Incoming::Change)
                }
                change = recv_feed(&mut self.conversation_feed), if self.conversation_feed.is_some() => {
                    change.map_or(Incoming::Closed(tables::CONVERSATIONS), Incoming::Change)
                }
                (conversation, event) = recv_presence(&mut self.presence_feeds) => {
                    Incoming::Presence(conversation, event)
                }
            };

            match incoming {
                Incoming::Change(change) => {
                    if let Some(event) = self.apply_change(change).await? {
                        return Ok(Some(event));
                    }
                }
                Incoming::Presence(conversation, event) => {
                    if self.on_presence_event(&conversation, &event) {
                        return Ok(Some(RosterEvent::PresenceChanged(conversation)));
                    }
                }
                Incoming::Closed(table) => {
                    log::debug!("{} feed closed", table);
                    if table == tables::MESSAGES {
                        self.message_feed = None;
                    } else {
                        self.conversation_feed = None;
                    }
                }
            }
        }
    }

    /// Apply every change already delivered, without waiting.
    pub async fn drain_pending(&mut self) -> Result<Vec<RosterEvent>> {
        let mut pending = Vec::new();
        for feed in [&mut self.message_feed, &mut self.conversation_feed] {
            if let Some(sub) = feed {
                while let Some(change) = sub.try_recv() {
                    pending.push(change);
                }
            }
        }
        let mut presence = Vec::new();
        for (conversation, feed) in &mut self.presence_feeds {
            while let Some(event) = feed.try_recv() {
                presence.push((conversation.clone(), event));
            }
        }

        let mut events = Vec::new();
        for change in pending {
            if let Some(event) = self.apply_change(change).await? {
                events.push(event);
            }
        }
        for (conversation, event) in presence {
            if self.on_presence_event(&conversation, &event) {
                events.push(RosterEvent::PresenceChanged(conversation));
            }
        }
        Ok(events)
    }

    /// React to an authentication change. Signing out clears everything.
    pub fn handle_auth_event(&mut self, event: &AuthEvent) -> bool {
        match event {
            AuthEvent::SignedOut => {
                self.clear();
                true
            }
            AuthEvent::SignedIn(session) if session.id != self.viewer.id => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    fn clear(&mut self) {
        log::debug!("clearing roster of {}", self.viewer.id);
        for feed in [&mut self.message_feed, &mut self.conversation_feed] {
            if let Some(mut sub) = feed.take() {
                sub.close();
            }
        }
        for (_, mut feed) in self.presence_feeds.drain(..) {
            feed.close();
        }
        self.entries.clear();
        self.presence.clear();
        self.unread.reset();
    }

    /// Whether `user` has a fresh record on a watched presence channel.
    pub fn is_online(&self, user: &UserId) -> bool {
        let ttl = Duration::from_std(self.client.config.presence_ttl).unwrap_or_else(|_| Duration::days(365));
        let now = self.client.clock.now();
        self.presence.get(user).map_or(false, |r| r.is_fresh(now, ttl))
    }

    /// The UI opened `conversation`: its unread count drops to zero.
    pub async fn set_open_conversation(&mut self, conversation: &ConversationId) -> Result<()> {
        self.unread.set_open_conversation(conversation).await
    }

    /// The UI closed the open conversation.
    pub fn clear_open_conversation(&mut self) {
        self.unread.clear_open_conversation();
    }

    /// Summaries in sidebar order.
    pub fn list(&self) -> Vec<ConversationSummary> {
        self.entries.iter().map(|e| self.summarize(e)).collect()
    }

    /// Summaries whose other participant's name contains `needle`, ignoring case.
    pub fn search(&self, needle: &str) -> Vec<ConversationSummary> {
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.other.name.to_lowercase().contains(&needle))
            .map(|e| self.summarize(e))
            .collect()
    }

    /// Summary of one conversation.
    pub fn get(&self, conversation: &ConversationId) -> Option<ConversationSummary> {
        self.entries
            .iter()
            .find(|e| &e.conversation.id == conversation)
            .map(|e| self.summarize(e))
    }

    fn summarize(&self, entry: &Entry) -> ConversationSummary {
        ConversationSummary {
            conversation_id: entry.conversation.id.clone(),
            other_participant: entry.other.clone(),
            last_message_preview: self.preview(entry.last.as_ref()),
            last_message_at: entry.last_message_at(),
            unread_count: self.unread.unread_count(&entry.conversation.id),
            is_online: self.is_online(&entry.other.id),
        }
    }

    fn preview(&self, last: Option<&MessageRow>) -> String {
        match last {
            None => EMPTY_PREVIEW.to_owned(),
            Some(row) if row.sender_id == self.viewer.id => format!("You: {}", row.content),
            Some(row) => {
                let name = row
                    .sender_name
                    .as_deref()
                    .unwrap_or(&self.client.config.unknown_user_label);
                format!("{}: {}", name, row.content)
            }
        }
    }

    /// Check whether a conversation is listed.
    pub fn contains(&self, conversation: &ConversationId) -> bool {
        self.entries.iter().any(|e| &e.conversation.id == conversation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total unread badge.
    pub fn total_unread(&self) -> u32 {
        self.unread.total()
    }

    pub fn unread(&self) -> &UnreadAccounting {
        &self.unread
    }

    pub fn unread_mut(&mut self) -> &mut UnreadAccounting {
        &mut self.unread
    }

    pub fn viewer(&self) -> &Session {
        &self.viewer
    }
}

async fn recv_feed<T>(feed: &mut Option<Subscription<T>>) -> Option<T> {
    match feed {
        Some(sub) => sub.recv().await,
        None => None,
    }
}

/// Next event from whichever presence channel has one. Pending while none do.
async fn recv_presence(
    feeds: &mut [(ConversationId, Subscription<PresenceEvent>)],
) -> (ConversationId, PresenceEvent) {
    std::future::poll_fn(|cx| {
        for (conversation, feed) in feeds.iter_mut() {
            if let Poll::Ready(Some(event)) = feed.poll_recv(cx) {
                return Poll::Ready((conversation.clone(), event));
            }
        }
        Poll::Pending
    })
    .await
}
