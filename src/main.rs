//! buildstash - build directory cache
//!
//! CLI entry point that dispatches to subcommands.

use buildstash::cli::{Cli, Commands};
use buildstash::config::ConfigManager;
use buildstash::error::{StashError, StashResult};
use buildstash::remote::interrupt_pair;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            if e.is_interrupted() {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Log to stderr; stdout is reserved for command output and agent frames
fn init_logging(verbose: u8, json: bool) {
    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match verbose {
        0 => EnvFilter::new("buildstash=warn"),
        1 => EnvFilter::new("buildstash=info"),
        _ => EnvFilter::new("buildstash=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> StashResult<()> {
    let cli = Cli::parse();

    // The agent runs on the executor and needs no configuration
    if let Commands::Agent = cli.command {
        init_logging(cli.verbose, false);
        return buildstash::cli::commands::agent().await;
    }

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| StashError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, config.general.log_format == "json");
    match local_config_path {
        Some(ref path) => debug!("Found local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => {}
    }

    let (interrupt_handle, interrupt) = interrupt_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, abandoning in-flight requests");
        interrupt_handle.trigger();

        // A second Ctrl-C does not wait for cleanup
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    match cli.command {
        Commands::Agent => buildstash::cli::commands::agent().await,
        Commands::Seed(args) => buildstash::cli::commands::seed(args, &config, interrupt).await,
        Commands::Save(args) => buildstash::cli::commands::save(args, &config, interrupt).await,
        Commands::Size(args) => buildstash::cli::commands::size(args, &config, interrupt).await,
        Commands::Key(args) => buildstash::cli::commands::key(args, &config).await,
        Commands::Config(args) => {
            buildstash::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
