//! Presence models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::UserId;

/// A client's announcement on a conversation presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub display_name: String,
    /// Time of the latest heartbeat.
    pub online_at: DateTime<Utc>,
    /// Last time the user had the conversation visible, set when going idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Create a fresh heartbeat record.
    pub fn heartbeat(user_id: impl Into<UserId>, name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: name.into(),
            online_at: at,
            last_active_at: None,
        }
    }

    /// Check whether the heartbeat is still fresh at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.online_at < ttl
    }

    /// Most recent moment the user is known to have been active.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_active_at.unwrap_or(self.online_at)
    }
}

/// Coarse "last active" bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Now,
    MinutesAgo(i64),
    HoursAgo(i64),
    DaysAgo(i64),
}

impl Activity {
    /// Bucket the time elapsed between `last_seen` and `now`.
    pub fn since(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let elapsed = now - last_seen;
        let minutes = elapsed.num_minutes();
        if minutes < 1 {
            Activity::Now
        } else if minutes < 60 {
            Activity::MinutesAgo(minutes)
        } else if elapsed.num_hours() < 24 {
            Activity::HoursAgo(elapsed.num_hours())
        } else {
            Activity::DaysAgo(elapsed.num_days())
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Now => write!(f, "Active now"),
            Activity::MinutesAgo(n) => write!(f, "Active {}m ago", n),
            Activity::HoursAgo(n) => write!(f, "Active {}h ago", n),
            Activity::DaysAgo(n) => write!(f, "Active {}d ago", n),
        }
    }
}
