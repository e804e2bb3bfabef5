//! Data models for chat entities.

mod conversation;
mod ids;
mod message;
mod presence;

pub use conversation::{Conversation, ConversationSummary, Session, UserProfile};
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{Author, Message, MessagePayload, MessageRow, NewMessage, PayloadUser};
pub use presence::{Activity, PresenceRecord};
