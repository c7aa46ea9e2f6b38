//! Command-line interface.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// h2serve - stream files over HTTPS/2 with optional on-the-fly compression
#[derive(Debug, Parser)]
#[command(name = "h2serve", version, about)]
pub struct Cli {
    /// Configuration file (TOML, or JSON when it ends in .json)
    #[arg(
        short = 'c',
        long = "config",
        env = "H2SERVE_CONFIG",
        default_value = "config.toml",
        value_name = "PATH",
        global = true
    )]
    pub config: PathBuf,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server until interrupted (default)
    Serve,

    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Stream one file through the pipeline to stdout
    Cat {
        /// File to stream
        path: PathBuf,

        /// Compress with the configured encoding regardless of size and extension
        #[arg(long)]
        compress: bool,
    },
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Serve)
    }

    /// Default log filter for the verbosity count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
