//! `sessionhub` CLI — headless interface to the collaboration session hub.
//!
//! A single `serve` subcommand (the default when none is given) starts the
//! gateway; `--config` and `--port` override the loaded configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sessionhub", about = "Realtime collaboration session hub", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a TOML config file (defaults to ~/.sessionhub/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the bind port.
    #[arg(long, global = true)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway and block until shutdown.
    Serve,
}
