//! Conversation, user and roster models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Author, ConversationId, UserId};

/// A user profile as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

impl UserProfile {
    /// Create a new profile.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// This profile as a message author.
    pub fn as_author(&self) -> Author {
        Author::new(self.id.clone(), self.name.clone())
    }
}

/// The currently signed-in user.
pub type Session = UserProfile;

/// A one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// First participant, fixed at creation.
    pub participant_a: UserId,
    /// Second participant, fixed at creation.
    pub participant_b: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Check whether `user` takes part in this conversation.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.participant_a == user || &self.participant_b == user
    }

    /// Resolve the participant that is not `viewer`.
    ///
    /// Returns `None` when the viewer is not a participant.
    pub fn other_participant(&self, viewer: &UserId) -> Option<&UserId> {
        if &self.participant_a == viewer {
            Some(&self.participant_b)
        } else if &self.participant_b == viewer {
            Some(&self.participant_a)
        } else {
            None
        }
    }

    /// Check whether this conversation is between `a` and `b`, in either order.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.participant_a == a && &self.participant_b == b)
            || (&self.participant_a == b && &self.participant_b == a)
    }
}

/// Derived sidebar row for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_participant: UserProfile,
    pub last_message_preview: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub is_online: bool,
}

impl ConversationSummary {
    /// Unread badge text, capped at "9+". Empty when nothing is unread.
    pub fn badge(&self) -> String {
        match self.unread_count {
            0 => String::new(),
            n if n > 9 => "9+".to_owned(),
            n => n.to_string(),
        }
    }
}
