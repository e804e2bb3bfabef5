//! Subcommand definitions and printing.

pub mod chat;
pub mod user;
