//! Chat message models and the realtime wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConversationId, MessageId, UserId};
use crate::error::{Error, Result};

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Sender user ID, when the origin carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    /// Sender display name.
    pub name: String,
}

impl Author {
    /// Create an author with a known ID.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
        }
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID, unique within a conversation.
    pub id: MessageId,
    /// Text content.
    pub content: String,
    /// Sender.
    pub user: Author,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Total ordering key: creation time, then ID.
    pub fn sort_key(&self) -> (DateTime<Utc>, &MessageId) {
        (self.created_at, &self.id)
    }

    /// Sender display name.
    pub fn sender_name(&self) -> &str {
        &self.user.name
    }

    /// Whether this message was written by `user`.
    ///
    /// Matches on the author ID when present, falling back to the display
    /// name for payloads that only carry a name.
    pub fn is_from(&self, user: &Author) -> bool {
        match (&self.user.id, &user.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.user.name == user.name,
        }
    }

    /// Encode as a broadcast payload.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse and validate a broadcast payload.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let raw: MessagePayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::validation(format!("malformed message payload: {}", e)))?;
        raw.validate()
    }
}

/// Loosely-typed message as it arrives on the broadcast channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Option<String>,
    pub content: Option<String>,
    pub user: Option<PayloadUser>,
    pub created_at: Option<String>,
}

/// Author block of a [`MessagePayload`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadUser {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl MessagePayload {
    /// Turn the raw payload into a typed message, rejecting missing fields.
    pub fn validate(self) -> Result<Message> {
        let id = non_empty(self.id).ok_or_else(|| Error::validation("missing id"))?;
        let content = non_empty(self.content).ok_or_else(|| Error::validation("missing content"))?;
        let user = self.user.ok_or_else(|| Error::validation("missing user"))?;
        let name = non_empty(user.name).ok_or_else(|| Error::validation("missing user name"))?;
        let created_at = non_empty(self.created_at)
            .ok_or_else(|| Error::validation("missing createdAt"))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::validation(format!("bad createdAt {:?}: {}", created_at, e)))?
            .with_timezone(&Utc);

        Ok(Message {
            id: id.into(),
            content,
            user: Author {
                id: non_empty(user.id).map(UserId::from),
                name,
            },
            created_at,
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// Row handed to the persistence layer on send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persisted message joined with its sender's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// `None` when the sender profile no longer exists.
    pub sender_name: Option<String>,
    pub content: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// Convert to a view message, filling gaps with fallbacks.
    pub fn into_message(self, unknown_user: &str, now: DateTime<Utc>) -> Message {
        Message {
            id: self.id,
            content: self.content,
            user: Author {
                id: Some(self.sender_id),
                name: self.sender_name.unwrap_or_else(|| unknown_user.to_owned()),
            },
            created_at: self.created_at.unwrap_or(now),
        }
    }
}
