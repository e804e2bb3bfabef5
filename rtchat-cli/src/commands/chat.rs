//! Chat commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;

use crate::handlers::chat as handlers;
use crate::output::{print_one, print_table, OutputFormat, PlainPrint};
use crate::workspace::Workspace;

#[derive(Subcommand)]
pub enum ChatAction {
    /// Start a conversation with a user, or reuse the existing one
    Start {
        /// Other participant's user ID
        user_id: String,
    },

    /// List conversations
    #[command(alias = "ls")]
    List {
        /// Only conversations whose participant name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show a conversation and mark it read
    Read {
        /// Conversation ID
        conversation_id: String,
    },

    /// Send a message
    Send {
        /// Conversation ID
        conversation_id: String,
        /// Message content
        content: String,
    },
}

pub async fn handle(action: ChatAction, data_dir: &Path, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open_authed(data_dir).await?;
    match action {
        ChatAction::Start { user_id } => {
            let info = handlers::start_conversation(&workspace, &user_id).await?;
            print_one(&info, format);
            Ok(())
        }
        ChatAction::List { search } => list_conversations(&workspace, search.as_deref(), format).await,
        ChatAction::Read { conversation_id } => read_conversation(&workspace, &conversation_id, format).await,
        ChatAction::Send {
            conversation_id,
            content,
        } => {
            let result = handlers::send_message(&workspace, &conversation_id, &content).await?;
            if matches!(format, OutputFormat::Json) {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Sent {}", result.message_id.dimmed());
            }
            Ok(())
        }
    }
}

async fn list_conversations(workspace: &Workspace, search: Option<&str>, format: OutputFormat) -> Result<()> {
    let result = handlers::list_conversations(workspace, search).await?;

    if matches!(format, OutputFormat::Plain) && result.total_unread > 0 {
        println!("{}\n", format!("{} unread", result.total_unread).red());
    }

    print_table(result.conversations, format, "No conversations yet");
    Ok(())
}

async fn read_conversation(workspace: &Workspace, id: &str, format: OutputFormat) -> Result<()> {
    let result = handlers::read_conversation(workspace, id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Plain => {
            println!("Conversation with {}\n", result.with.green());
            if result.messages.is_empty() {
                println!("No messages yet");
            }
            for message in &result.messages {
                message.plain_print();
            }
        }
        OutputFormat::Table => {
            println!("Conversation with {}\n", result.with.green());
            print_table(result.messages, format, "No messages yet");
        }
    }
    Ok(())
}
