//! Chat client: the container that wires collaborators into sync components.

mod builder;

pub use builder::ChatClientBuilder;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{AuthEvent, Identity, Persistence, Realtime, Subscription};
use crate::clock::Clock;
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::models::{Conversation, ConversationId, Session, UserId};
use crate::storage::KeyValueStore;
use crate::sync::{ConversationRoster, MessageStore, PresenceTracker, UnreadAccounting};

/// Internal client state shared by every component it hands out.
#[derive(Debug)]
pub(crate) struct ChatClientInner {
    pub identity: Arc<dyn Identity>,
    pub persistence: Arc<dyn Persistence>,
    pub realtime: Arc<dyn Realtime>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub config: ChatConfig,
    pub auth_events: Mutex<Option<Subscription<AuthEvent>>>,
}

impl ChatClientInner {
    /// Get the signed-in user or error.
    pub async fn require_session(&self) -> Result<Session> {
        self.identity
            .current_session()
            .await?
            .ok_or(Error::AuthRequired)
    }
}

/// Realtime chat client.
///
/// Cheap to clone; clones share collaborators and configuration.
#[derive(Clone)]
pub struct ChatClient {
    pub(crate) inner: Arc<ChatClientInner>,
}

impl ChatClient {
    /// Create a new client builder.
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::new()
    }

    /// Open a conversation: subscribe to its live messages and load history.
    pub async fn open_conversation(&self, id: impl Into<ConversationId>) -> Result<MessageStore> {
        MessageStore::open(self.inner.clone(), id.into()).await
    }

    /// Presence tracker for a conversation, not yet connected.
    pub async fn presence(&self, id: impl Into<ConversationId>) -> Result<PresenceTracker> {
        let me = self.inner.require_session().await?;
        Ok(PresenceTracker::new(self.inner.clone(), id.into(), me))
    }

    /// Unread counters of the signed-in user.
    pub async fn unread(&self) -> Result<UnreadAccounting> {
        let viewer = self.inner.require_session().await?;
        Ok(UnreadAccounting::new(self.inner.clone(), viewer))
    }

    /// Loaded conversation roster of the signed-in user.
    pub async fn roster(&self) -> Result<ConversationRoster> {
        let viewer = self.inner.require_session().await?;
        let mut roster = ConversationRoster::new(self.inner.clone(), viewer);
        roster.load().await?;
        Ok(roster)
    }

    /// Start a conversation with `other`, or return the existing one.
    pub async fn start_conversation(&self, other: &UserId) -> Result<Conversation> {
        let me = self.inner.require_session().await?;
        if &me.id == other {
            return Err(Error::validation("cannot start a conversation with yourself"));
        }
        if self.inner.persistence.query_user(other).await?.is_none() {
            return Err(Error::not_found(format!("user {}", other)));
        }

        let conversation = Conversation {
            id: ConversationId::generate(),
            participant_a: me.id,
            participant_b: other.clone(),
            created_at: self.inner.clock.now(),
        };
        let stored = self.inner.persistence.upsert_conversation(&conversation).await?;
        log::debug!("conversation {} with {}", stored.id, other);
        Ok(stored)
    }

    /// The signed-in user, if any.
    pub async fn current_session(&self) -> Result<Option<Session>> {
        self.inner.identity.current_session().await
    }

    /// Fresh stream of authentication changes.
    pub async fn subscribe_auth(&self) -> Result<Subscription<AuthEvent>> {
        self.inner.identity.subscribe_auth().await
    }

    /// Wait for the next authentication change on the client's own stream.
    ///
    /// The stream is opened on first call; `Ok(None)` once it ends.
    pub async fn next_auth_event(&self) -> Result<Option<AuthEvent>> {
        let mut guard = self.inner.auth_events.lock().await;
        if guard.is_none() {
            *guard = Some(self.inner.identity.subscribe_auth().await?);
        }
        match guard.as_mut() {
            Some(sub) => Ok(sub.recv().await),
            None => Ok(None),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    /// Time source used by every component.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("config", &self.inner.config)
            .finish()
    }
}
