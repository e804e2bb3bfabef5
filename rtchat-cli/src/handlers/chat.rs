//! Conversation handlers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rtchat::{ConversationId, ConversationRoster, ConversationSummary, Message, Session, UserId};
use serde::Serialize;

use crate::output::{format_relative_time, PlainPrint, TableRow};
use crate::workspace::Workspace;

/// Sidebar row.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInfo {
    pub id: String,
    pub with: String,
    pub with_id: String,
    pub preview: String,
    pub last_time: Option<DateTime<Utc>>,
    pub unread: u32,
    pub badge: String,
    pub is_online: bool,
}

impl From<&ConversationSummary> for ConversationInfo {
    fn from(s: &ConversationSummary) -> Self {
        Self {
            id: s.conversation_id.to_string(),
            with: s.other_participant.name.clone(),
            with_id: s.other_participant.id.to_string(),
            preview: s.last_message_preview.clone(),
            last_time: s.last_message_at,
            unread: s.unread_count,
            badge: s.badge(),
            is_online: s.is_online,
        }
    }
}

impl TableRow for ConversationInfo {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "With", "Last message", "When", "Unread"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.with.clone(),
            self.preview.clone(),
            format_relative_time(self.last_time),
            self.badge.clone(),
        ]
    }
}

impl PlainPrint for ConversationInfo {
    fn plain_print(&self) {
        let badge = if self.badge.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.badge).red().to_string()
        };
        println!(
            "[{}] {}{} {}",
            self.id.cyan(),
            self.with.green(),
            badge,
            format_relative_time(self.last_time).dimmed()
        );
        println!("   {}", self.preview);
    }
}

/// Roster listing.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationListResult {
    pub total_unread: u32,
    pub conversations: Vec<ConversationInfo>,
}

/// One message of a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct MessageInfo {
    pub id: String,
    pub from: String,
    pub is_mine: bool,
    pub content: String,
    pub time: DateTime<Utc>,
}

impl MessageInfo {
    fn new(message: &Message, viewer: &Session) -> Self {
        let is_mine = message.is_from(&viewer.as_author());
        Self {
            id: message.id.to_string(),
            from: if is_mine {
                "You".to_string()
            } else {
                message.sender_name().to_string()
            },
            is_mine,
            content: message.content.clone(),
            time: message.created_at,
        }
    }
}

impl TableRow for MessageInfo {
    fn headers() -> Vec<&'static str> {
        vec!["From", "Content", "Time"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.from.clone(),
            self.content.clone(),
            format_relative_time(Some(self.time)),
        ]
    }
}

impl PlainPrint for MessageInfo {
    fn plain_print(&self) {
        let from = if self.is_mine {
            self.from.green().to_string()
        } else {
            self.from.clone()
        };
        println!("{} {}", from, format_relative_time(Some(self.time)).dimmed());
        for line in self.content.lines() {
            if !line.trim().is_empty() {
                println!("   {}", line);
            }
        }
        println!();
    }
}

/// Conversation history.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationResult {
    pub id: String,
    pub with: String,
    pub unread_before: u32,
    pub messages: Vec<MessageInfo>,
}

/// Send message result.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResult {
    pub conversation_id: String,
    pub message_id: String,
    pub content: String,
}

async fn roster_with(workspace: &Workspace, conversation: &ConversationId) -> Result<ConversationRoster> {
    let roster = workspace.client.roster().await?;
    if !roster.contains(conversation) {
        anyhow::bail!("Conversation {} not found", conversation);
    }
    Ok(roster)
}

/// Start (or reuse) a conversation with another user.
pub async fn start_conversation(workspace: &Workspace, user_id: &str) -> Result<ConversationInfo> {
    let conversation = workspace
        .client
        .start_conversation(&UserId::from(user_id))
        .await?;
    workspace.save().await?;

    let roster = workspace.client.roster().await?;
    let summary = roster
        .get(&conversation.id)
        .context("Conversation missing from roster")?;
    Ok(ConversationInfo::from(&summary))
}

/// List conversations, optionally filtered by participant name.
pub async fn list_conversations(workspace: &Workspace, search: Option<&str>) -> Result<ConversationListResult> {
    let roster = workspace.client.roster().await?;
    let summaries = match search {
        Some(needle) => roster.search(needle),
        None => roster.list(),
    };
    Ok(ConversationListResult {
        total_unread: roster.total_unread(),
        conversations: summaries.iter().map(ConversationInfo::from).collect(),
    })
}

/// Read a conversation and mark it read.
pub async fn read_conversation(workspace: &Workspace, id: &str) -> Result<ConversationResult> {
    let id = ConversationId::from(id);
    let mut roster = roster_with(workspace, &id).await?;
    let summary = roster
        .get(&id)
        .context("Conversation missing from roster")?;

    let mut store = workspace.client.open_conversation(id.clone()).await?;
    let viewer = roster.viewer().clone();
    let messages = store.iter().map(|m| MessageInfo::new(m, &viewer)).collect();
    store.close();

    roster.set_open_conversation(&id).await?;
    roster.clear_open_conversation();

    Ok(ConversationResult {
        id: id.to_string(),
        with: summary.other_participant.name,
        unread_before: summary.unread_count,
        messages,
    })
}

/// Send a message to a conversation.
pub async fn send_message(workspace: &Workspace, id: &str, content: &str) -> Result<SendMessageResult> {
    let id = ConversationId::from(id);
    roster_with(workspace, &id).await?;

    let mut store = workspace.client.open_conversation(id.clone()).await?;
    let sent = store.send(content).await?;
    store.close();
    workspace.save().await?;

    Ok(SendMessageResult {
        conversation_id: id.to_string(),
        message_id: sent.id.to_string(),
        content: sent.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config, UserConfig};
    use rtchat::UserProfile;

    async fn workspace(dir: &std::path::Path, id: &str, name: &str) -> Workspace {
        let config = Config {
            user: Some(UserConfig {
                id: id.to_string(),
                name: name.to_string(),
            }),
        };
        config::save_config(dir, &config).unwrap();
        Workspace::open_authed(dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_conversation_flow_between_two_users() {
        let dir = tempfile::tempdir().unwrap();

        let bob = workspace(dir.path(), "bob", "Bob").await;
        bob.backend.add_user(UserProfile::new("alice", "Alice"));
        let started = start_conversation(&bob, "alice").await.unwrap();
        assert_eq!(started.preview, "Start chatting");
        send_message(&bob, &started.id, "hello").await.unwrap();
        drop(bob);

        let alice = workspace(dir.path(), "alice", "Alice").await;
        let listed = list_conversations(&alice, None).await.unwrap();
        assert_eq!(listed.total_unread, 1);
        assert_eq!(listed.conversations[0].preview, "Bob: hello");

        let read = read_conversation(&alice, &started.id).await.unwrap();
        assert_eq!(read.unread_before, 1);
        assert_eq!(read.messages.len(), 1);
        assert!(!read.messages[0].is_mine);

        let listed = list_conversations(&alice, Some("bo")).await.unwrap();
        assert_eq!(listed.total_unread, 0);
        assert_eq!(listed.conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let bob = workspace(dir.path(), "bob", "Bob").await;
        assert!(read_conversation(&bob, "nope").await.is_err());
        assert!(send_message(&bob, "nope", "hi").await.is_err());
    }
}
