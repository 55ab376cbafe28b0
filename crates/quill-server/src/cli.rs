use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "quill",
    about = "Private journal API with encrypted fields and rate limiting",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Optional subcommand; defaults to `serve` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API.
    Serve {
        /// Bind address, overriding config and `QUILL_LISTEN_ADDR`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Print a fresh base64 field key for `QUILL_ENCRYPTION_KEY`.
    Keygen,
    /// Check the field key and rate limit store.
    Health,
    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
