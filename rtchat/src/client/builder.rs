use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{ChatClient, ChatClientInner};
use crate::backend::{Identity, MemoryBackend, Persistence, Realtime};
use crate::clock::{Clock, SystemClock};
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, MemoryStore};

/// Builder for creating [`ChatClient`].
pub struct ChatClientBuilder {
    identity: Option<Arc<dyn Identity>>,
    persistence: Option<Arc<dyn Persistence>>,
    realtime: Option<Arc<dyn Realtime>>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: ChatConfig,
}

impl std::fmt::Debug for ChatClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClientBuilder")
            .field("identity", &self.identity.is_some())
            .field("persistence", &self.persistence.is_some())
            .field("realtime", &self.realtime.is_some())
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            identity: None,
            persistence: None,
            realtime: None,
            store: None,
            clock: None,
            config: ChatConfig::default(),
        }
    }

    /// Set the identity provider.
    pub fn identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Set the relational store.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the realtime service.
    pub fn realtime(mut self, realtime: Arc<dyn Realtime>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Use one in-process backend for identity, persistence and realtime.
    pub fn backend(self, backend: Arc<MemoryBackend>) -> Self {
        let identity: Arc<dyn Identity> = backend.clone();
        let persistence: Arc<dyn Persistence> = backend.clone();
        let realtime: Arc<dyn Realtime> = backend;
        self.identity(identity)
            .persistence(persistence)
            .realtime(realtime)
    }

    /// Set durable local storage for read watermarks.
    ///
    /// Defaults to an in-memory store.
    pub fn local_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the presence heartbeat period.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set how long a heartbeat keeps a user online.
    pub fn presence_ttl(mut self, ttl: Duration) -> Self {
        self.config.presence_ttl = ttl;
        self
    }

    /// Set the label shown for senders without a profile.
    pub fn unknown_user_label(mut self, label: impl Into<String>) -> Self {
        self.config.unknown_user_label = label.into();
        self
    }

    /// Build [`ChatClient`].
    pub fn build(self) -> Result<ChatClient> {
        let identity = self
            .identity
            .ok_or_else(|| Error::validation("identity provider not set"))?;
        let persistence = self
            .persistence
            .ok_or_else(|| Error::validation("persistence not set"))?;
        let realtime = self
            .realtime
            .ok_or_else(|| Error::validation("realtime service not set"))?;
        if self.config.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat interval must be positive"));
        }

        Ok(ChatClient {
            inner: Arc::new(ChatClientInner {
                identity,
                persistence,
                realtime,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                config: self.config,
                auth_events: Mutex::new(None),
            }),
        })
    }
}
