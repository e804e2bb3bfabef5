//! Command logic shared by the subcommands, independent of printing.

pub mod chat;
pub mod user;
