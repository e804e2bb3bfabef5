//! Read watermarks and unread counters.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    client::ChatClientInner,
    error::Result,
    models::{Author, ConversationId, Message, MessageId, MessageRow, Session},
    storage::KeyValueStoreExt,
};

/// A new-message notification, whichever stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender: Author,
    pub created_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// From a message merged into a conversation's store.
    pub fn from_message(conversation_id: &ConversationId, message: &Message) -> Self {
        Self {
            conversation_id: conversation_id.clone(),
            message_id: message.id.clone(),
            sender: message.user.clone(),
            created_at: message.created_at,
        }
    }

    /// From a change-feed row.
    pub fn from_row(row: &MessageRow, fallback_time: DateTime<Utc>) -> Self {
        Self {
            conversation_id: row.conversation_id.clone(),
            message_id: row.id.clone(),
            sender: Author {
                id: Some(row.sender_id.clone()),
                name: row.sender_name.clone().unwrap_or_default(),
            },
            created_at: row.created_at.unwrap_or(fallback_time),
        }
    }
}

/// Count unread messages from scratch: messages not written by `viewer` and
/// created strictly after `watermark`.
pub fn count_unread<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    viewer: &Author,
    watermark: Option<DateTime<Utc>>,
) -> u32 {
    messages
        .into_iter()
        .filter(|m| !m.is_from(viewer))
        .filter(|m| watermark.map_or(true, |w| m.created_at > w))
        .count() as u32
}

/// Unread ids of one conversation; the count is the set's size.
#[derive(Debug, Default)]
struct Counter {
    counted: HashSet<MessageId>,
}

impl Counter {
    fn count(&self) -> u32 {
        self.counted.len() as u32
    }
}

/// Per-conversation unread counters for one viewer.
///
/// Counters move two ways: by +1 per qualifying message event, and by a full
/// recount against the persisted watermark. Both paths track message ids, so an
/// event already covered by a recount is not counted again while a row the
/// recount never saw still is.
#[derive(Debug)]
pub struct UnreadAccounting {
    client: Arc<ChatClientInner>,
    viewer: Session,
    open: Option<ConversationId>,
    counters: HashMap<ConversationId, Counter>,
    watermarks: HashMap<ConversationId, Option<DateTime<Utc>>>,
}

impl UnreadAccounting {
    pub(crate) fn new(client: Arc<ChatClientInner>, viewer: Session) -> Self {
        Self {
            client,
            viewer,
            open: None,
            counters: HashMap::new(),
            watermarks: HashMap::new(),
        }
    }

    /// The viewer these counters belong to.
    pub fn viewer(&self) -> &Session {
        &self.viewer
    }

    /// Read watermark of a conversation, loading it from local storage once.
    pub async fn watermark(&mut self, conversation: &ConversationId) -> Result<Option<DateTime<Utc>>> {
        if let Some(cached) = self.watermarks.get(conversation) {
            return Ok(*cached);
        }
        let key = self.key(conversation);
        let stored = self.client.store.get_timestamp(&key).await?;
        self.watermarks.insert(conversation.clone(), stored);
        Ok(stored)
    }

    /// Mark everything up to now as read.
    pub async fn mark_read(&mut self, conversation: &ConversationId) -> Result<()> {
        let now = self.client.clock.now();
        let key = self.key(conversation);
        self.client.store.set_timestamp(&key, now).await.map_err(|e| {
            log::error!("saving watermark {} failed: {}", key, e);
            e
        })?;
        self.watermarks.insert(conversation.clone(), Some(now));
        self.counters.insert(conversation.clone(), Counter::default());
        log::debug!("marked {} read at {}", conversation, now);
        Ok(())
    }

    /// The UI navigated to `conversation`.
    pub async fn set_open_conversation(&mut self, conversation: &ConversationId) -> Result<()> {
        self.open = Some(conversation.clone());
        self.mark_read(conversation).await
    }

    /// The UI navigated away from any conversation.
    pub fn clear_open_conversation(&mut self) {
        self.open = None;
    }

    /// Conversation currently on screen.
    pub fn open_conversation(&self) -> Option<&ConversationId> {
        self.open.as_ref()
    }

    /// Incremental path: account for one new message.
    ///
    /// Returns the conversation's unread count afterwards.
    pub async fn on_message(&mut self, event: &IncomingMessage) -> Result<u32> {
        let conversation = &event.conversation_id;
        if self.is_viewer(&event.sender) {
            return Ok(self.unread_count(conversation));
        }
        if self.open.as_ref() == Some(conversation) {
            self.mark_read(conversation).await?;
            return Ok(0);
        }

        let watermark = self.watermark(conversation).await?;
        let counter = self.counters.entry(conversation.clone()).or_default();
        let after_watermark = watermark.map_or(true, |w| event.created_at > w);
        if after_watermark && counter.counted.insert(event.message_id.clone()) {
            log::debug!("{} unread in {}", counter.count(), conversation);
        }
        Ok(counter.count())
    }

    /// Recount path: replace the counter with the persisted messages after
    /// the watermark.
    pub async fn recount(&mut self, conversation: &ConversationId) -> Result<u32> {
        let watermark = self.watermark(conversation).await?;
        let ids = self
            .client
            .persistence
            .query_unread_ids(conversation, &self.viewer.id, watermark)
            .await
            .map_err(|e| {
                log::error!("unread recount of {} failed: {}", conversation, e);
                e
            })?;

        let counter = if self.open.as_ref() == Some(conversation) {
            Counter::default()
        } else {
            Counter {
                counted: ids.into_iter().collect(),
            }
        };
        let count = counter.count();
        self.counters.insert(conversation.clone(), counter);
        Ok(count)
    }

    /// Unread count of one conversation.
    pub fn unread_count(&self, conversation: &ConversationId) -> u32 {
        self.counters.get(conversation).map_or(0, Counter::count)
    }

    /// Total unread badge.
    pub fn total(&self) -> u32 {
        self.counters.values().map(Counter::count).sum()
    }

    /// Forget all counters and cached watermarks. Stored watermarks stay.
    pub fn reset(&mut self) {
        self.open = None;
        self.counters.clear();
        self.watermarks.clear();
    }

    fn is_viewer(&self, sender: &Author) -> bool {
        match &sender.id {
            Some(id) => id == &self.viewer.id,
            None => sender.name == self.viewer.name,
        }
    }

    fn key(&self, conversation: &ConversationId) -> String {
        self.client
            .config
            .watermark_key(self.viewer.id.as_str(), conversation.as_str())
    }
}
