//! User directory handlers.

use anyhow::{bail, Result};
use colored::Colorize;
use rtchat::UserProfile;
use serde::Serialize;

use crate::output::{PlainPrint, TableRow};
use crate::workspace::Workspace;

/// User directory entry.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub is_me: bool,
}

impl TableRow for UserInfo {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", ""]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            if self.is_me { "you".to_string() } else { String::new() },
        ]
    }
}

impl PlainPrint for UserInfo {
    fn plain_print(&self) {
        let marker = if self.is_me { " (you)".dimmed().to_string() } else { String::new() };
        println!("[{}] {}{}", self.id.cyan(), self.name.green(), marker);
    }
}

/// Register or rename a user.
pub async fn add_user(workspace: &Workspace, id: &str, name: &str) -> Result<UserInfo> {
    if id.trim().is_empty() || name.trim().is_empty() {
        bail!("User id and name cannot be empty");
    }
    workspace.backend.add_user(UserProfile::new(id.trim(), name.trim()));
    workspace.save().await?;

    Ok(UserInfo {
        id: id.trim().to_string(),
        name: name.trim().to_string(),
        is_me: is_me(workspace, id.trim()),
    })
}

/// List every known user.
pub fn list_users(workspace: &Workspace) -> Vec<UserInfo> {
    workspace
        .backend
        .users()
        .into_iter()
        .map(|u| UserInfo {
            is_me: is_me(workspace, u.id.as_str()),
            id: u.id.to_string(),
            name: u.name,
        })
        .collect()
}

fn is_me(workspace: &Workspace, id: &str) -> bool {
    workspace.config.user.as_ref().map_or(false, |u| u.id == id)
}
