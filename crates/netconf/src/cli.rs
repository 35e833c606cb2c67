//! Clap derive structures for the `netconf` CLI.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// netconf -- talk to NETCONF devices, or pretend to be one
#[derive(Debug, Parser)]
#[command(
    name = "netconf",
    version,
    about = "Inspect and configure NETCONF devices from the command line",
    long_about = "A NETCONF client over plain TCP.\n\n\
        Negotiates capabilities, reads configuration with subtree filters and\n\
        applies edits through lock-protected write transactions. `serve` runs\n\
        an in-memory device for testing.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(long, short = 'p', env = "NETCONF_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Device host (overrides profile)
    #[arg(long, short = 'H', env = "NETCONF_HOST", global = true)]
    pub host: Option<String>,

    /// Device port (overrides profile)
    #[arg(long, short = 'P', env = "NETCONF_PORT", global = true)]
    pub port: Option<u16>,

    /// RPC timeout in seconds (overrides profile)
    #[arg(long, env = "NETCONF_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "text", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Negotiate a session and list both capability sets
    #[command(alias = "caps")]
    Capabilities,

    /// Read configuration from a datastore
    #[command(alias = "get")]
    GetConfig(GetConfigArgs),

    /// Apply one edit through a write transaction
    Edit(EditArgs),

    /// Serve an in-memory datastore over TCP
    Serve(ServeArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Running,
    Candidate,
    Startup,
}

#[derive(Debug, Args)]
pub struct GetConfigArgs {
    /// Datastore to read
    #[arg(long, short = 's', default_value = "running")]
    pub source: SourceArg,

    /// File holding the subtree filter selection
    #[arg(long, short = 'f', conflicts_with = "path")]
    pub filter: Option<PathBuf>,

    /// Node path to read, e.g. `/{urn:example}users/user[name=ann]`
    #[arg(long)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EditOperationArg {
    /// Replace the node
    Replace,
    /// Merge into the node
    Merge,
    /// Delete the node
    Delete,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    /// Node path to edit, e.g. `/{urn:example}users/user[name=ann]`
    #[arg(long)]
    pub path: String,

    /// XML file with the new node (not needed for delete)
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Edit operation
    #[arg(long, default_value = "merge")]
    pub operation: EditOperationArg,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, short = 'l', default_value = "127.0.0.1:8830")]
    pub listen: SocketAddr,

    /// Offer :candidate instead of :writable-running
    #[arg(long)]
    pub candidate: bool,

    /// XML file whose root children seed the datastores
    #[arg(long)]
    pub seed: Option<PathBuf>,

    /// List key, as `{namespace}list=key` (repeatable)
    #[arg(long = "list-key")]
    pub list_keys: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
