//! Realtime one-to-one chat synchronization.
//!
//! The crate keeps a client's view of a chat consistent while messages,
//! presence and read state arrive from several sources at once. Hosted
//! services are reached only through the [`backend`] traits, so the same
//! components run against a real service or the in-process [`MemoryBackend`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtchat::{ChatClient, MemoryBackend, UserProfile};
//!
//! # async fn demo() -> rtchat::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! backend.sign_in(UserProfile::new("bob", "Bob"));
//! let client = ChatClient::builder().backend(backend).build()?;
//!
//! let mut store = client.open_conversation("c1").await?;
//! store.send("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;

// Re-export main types
pub use backend::{AuthEvent, MemoryBackend};
pub use client::{ChatClient, ChatClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChatConfig;
pub use error::{Error, Result};

// Re-export commonly used models
pub use models::{
    Activity, Author, Conversation, ConversationId, ConversationSummary, Message, MessageId,
    PresenceRecord, Session, UserId, UserProfile,
};

// Re-export components
pub use sync::{
    ConversationRoster, MessageStore, PresenceState, PresenceTracker, RosterEvent, StoreEvent,
    UnreadAccounting, Visibility,
};
