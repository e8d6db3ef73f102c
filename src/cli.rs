// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fastssh")]
#[command(about = "Run remote commands, transfer and edit files over SSH")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only command output and final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to the config file (default: discover fastssh.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Host name from the config file, or [user@]host[:port]
    pub target: String,

    /// Read the password (or key passphrase) from this environment variable
    #[arg(long)]
    pub password_env: Option<String>,

    /// Private key file path or inline key text
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a fastssh.yml template in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check that a connection can be established
    Check {
        #[command(flatten)]
        target: Target,
    },

    /// Run a command and print its output once it exits
    Exec {
        #[command(flatten)]
        target: Target,

        /// Allocate a pseudo-terminal
        #[arg(long)]
        pty: bool,

        /// Stop waiting after this long (e.g. 30s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Environment variable for the command (NAME=VALUE)
        #[arg(long = "env", value_parser = parse_env_var)]
        env: Vec<(String, String)>,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Run a command and print its output as it arrives
    Stream {
        #[command(flatten)]
        target: Target,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Download a remote file
    Download {
        #[command(flatten)]
        target: Target,

        /// Remote file path
        remote: String,

        /// Local destination (default: write to stdout)
        #[arg(long)]
        to: Option<PathBuf>,
    },

    /// Upload a local file
    Upload {
        #[command(flatten)]
        target: Target,

        /// Local file path
        local: PathBuf,

        /// Remote file path
        remote: String,

        /// Compare checksums after the upload
        #[arg(long)]
        verify: bool,
    },

    /// Compare checksums of a remote and a local file
    Verify {
        #[command(flatten)]
        target: Target,

        /// Remote file path
        remote: String,

        /// Local file path
        local: PathBuf,
    },

    /// Replace text in a remote file
    Replace {
        #[command(flatten)]
        target: Target,

        /// Remote file path
        remote: String,

        /// Text (or pattern with --regex) to replace
        old: String,

        /// Replacement text
        new: String,

        /// Replace at most this many occurrences
        #[arg(long)]
        count: Option<usize>,

        /// Treat OLD as a regular expression
        #[arg(long)]
        regex: bool,

        /// Match case-insensitively (with --regex)
        #[arg(long, requires = "regex")]
        ignore_case: bool,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{}`", s)),
    }
}
