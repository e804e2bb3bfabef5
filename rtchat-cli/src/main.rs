//! rtchat CLI.

mod commands;
mod config;
mod handlers;
mod output;
mod workspace;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{chat, user};
use std::path::{Path, PathBuf};

/// Realtime chat sync, driven from the terminal
#[derive(Parser)]
#[command(name = "rtchat")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "plain")]
    format: output::OutputFormat,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding config, backend state and read watermarks
    #[arg(long, global = true, env = "RTCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the signed-in user
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// User directory
    #[command(alias = "u")]
    User {
        #[command(subcommand)]
        action: user::UserAction,
    },

    /// Conversations and messages
    #[command(alias = "c")]
    Chat {
        #[command(subcommand)]
        action: chat::ChatAction,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum AuthAction {
    /// Sign in as a user, registering the profile if needed
    Login {
        /// User ID
        #[arg(short, long)]
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
    },
    /// Sign out
    Logout,
    /// Show current auth status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::data_dir(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Auth { action } => handle_auth(action, &data_dir).await,
        Commands::User { action } => user::handle(action, &data_dir, cli.format).await,
        Commands::Chat { action } => chat::handle(action, &data_dir, cli.format).await,
        Commands::Config => {
            let cfg = config::load_config(&data_dir)?;
            println!("Config file: {}", config::config_path(&data_dir).display());
            println!("Signed in: {}", cfg.user.is_some());
            if let Some(user) = &cfg.user {
                println!("User: {} ({})", user.name, user.id);
            }
            Ok(())
        }
    }
}

async fn handle_auth(action: AuthAction, data_dir: &Path) -> Result<()> {
    match action {
        AuthAction::Login { id, name } => {
            let mut cfg = config::load_config(data_dir)?;
            cfg.user = Some(config::UserConfig {
                id: id.clone(),
                name: name.clone(),
            });
            config::save_config(data_dir, &cfg)?;

            // Opening signs the user in, which registers the profile.
            let workspace = workspace::Workspace::open(data_dir).await?;
            workspace.save().await?;

            tracing::info!(user = %id, "signed in");
            println!("Logged in as {} ({})", name.green(), id.cyan());
            Ok(())
        }
        AuthAction::Logout => {
            let mut cfg = config::load_config(data_dir)?;
            cfg.user = None;
            config::save_config(data_dir, &cfg)?;
            println!("Logged out");
            Ok(())
        }
        AuthAction::Status => {
            let cfg = config::load_config(data_dir)?;
            if let Some(user) = &cfg.user {
                println!("Logged in as {} ({})", user.name.green(), user.id.cyan());
            } else {
                println!("Not logged in");
            }
            Ok(())
        }
    }
}
