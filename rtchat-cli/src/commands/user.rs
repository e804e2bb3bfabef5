//! User commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::Path;

use crate::handlers::user as handlers;
use crate::output::{print_table, OutputFormat};
use crate::workspace::Workspace;

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a user profile
    Add {
        /// User ID
        #[arg(short, long)]
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
    },

    /// List known users
    #[command(alias = "ls")]
    List,
}

pub async fn handle(action: UserAction, data_dir: &Path, format: OutputFormat) -> Result<()> {
    let workspace = Workspace::open(data_dir).await?;
    match action {
        UserAction::Add { id, name } => {
            let user = handlers::add_user(&workspace, &id, &name).await?;
            println!("Registered {} ({})", user.name.green(), user.id.cyan());
            Ok(())
        }
        UserAction::List => {
            print_table(handlers::list_users(&workspace), format, "No users");
            Ok(())
        }
    }
}
