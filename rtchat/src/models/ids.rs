//! Type-safe ID wrappers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new ID from a string.
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Check if this ID is blank.
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_owned())
            }
        }

        impl From<&String> for $name {
            fn from(s: &String) -> Self {
                $name(s.clone())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(MessageId, "A chat message identifier.");
define_id!(ConversationId, "A one-to-one conversation identifier.");
define_id!(UserId, "A user identifier.");

impl MessageId {
    /// Generate a fresh random message ID.
    pub fn generate() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }
}

impl ConversationId {
    /// Generate a fresh random conversation ID.
    pub fn generate() -> Self {
        ConversationId(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_creation() {
        let id = ConversationId::new("room-1");
        assert_eq!(id.as_str(), "room-1");
        assert_eq!(format!("{}", id), "room-1");
    }

    #[test]
    fn test_id_is_empty() {
        assert!(UserId::new("").is_empty());
        assert!(UserId::new("  ").is_empty());
        assert!(!UserId::new("u1").is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(MessageId::from("a") < MessageId::from("b"));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::from("u7")).unwrap();
        assert_eq!(json, "\"u7\"");
    }
}
