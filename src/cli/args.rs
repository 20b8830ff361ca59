//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// buildstash - build directory cache
///
/// Restores cached directories into a build workspace before the build and
/// stores them again afterwards, streaming compressed archives between the
/// store and the (possibly remote) executor.
#[derive(Parser, Debug)]
#[command(name = "buildstash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUILDSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .buildstash.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore configured caches into the workspace
    Seed(SeedArgs),

    /// Store configured caches from the workspace
    Save(SaveArgs),

    /// Measure what each configured cache would store
    Size(SizeArgs),

    /// Print the store directory for a cache key
    Key(KeyArgs),

    /// Serve executor requests on stdin/stdout
    Agent,

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Workspace selection shared by cache commands
#[derive(Args, Debug, Clone, Default)]
pub struct WorkspaceArgs {
    /// Workspace directory on the executor (default: executor.workspace, then cwd)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Extra build variable for path expansion (KEY=VALUE, repeatable)
    #[arg(short, long = "env", value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,
}

/// Arguments for the seed command
#[derive(Parser, Debug)]
pub struct SeedArgs {
    #[command(flatten)]
    pub target: WorkspaceArgs,
}

/// Arguments for the save command
#[derive(Parser, Debug)]
pub struct SaveArgs {
    #[command(flatten)]
    pub target: WorkspaceArgs,

    /// Save even if the caches exceed store.max_size_mb
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the size command
#[derive(Parser, Debug)]
pub struct SizeArgs {
    #[command(flatten)]
    pub target: WorkspaceArgs,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the key command
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Cache key, usually the configured cache path
    pub key: String,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for the size command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
