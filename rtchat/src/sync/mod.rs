//! Client-side synchronization components.

mod message_store;
mod presence;
mod roster;
mod unread;

pub use message_store::{CloseHandle, MessageStore, StoreEvent};
pub use presence::{PresenceState, PresenceTracker, Visibility};
pub use roster::{ConversationRoster, RosterEvent, EMPTY_PREVIEW};
pub use unread::{count_unread, IncomingMessage, UnreadAccounting};
