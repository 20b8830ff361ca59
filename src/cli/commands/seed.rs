//! Seed command - restore caches before a build

use super::{build_env, configured_caches, execution_context, finish};
use crate::cache::{Cache, TransferOutcome};
use crate::cli::args::SeedArgs;
use crate::config::{Config, ConfigManager};
use crate::error::StashResult;
use crate::remote::{ExecutionContext, Interrupt};
use crate::ui::{self, TaskSpinner, UiContext};
use std::collections::BTreeMap;
use std::path::Path;

/// Execute the seed command
pub async fn execute(args: SeedArgs, config: &Config, interrupt: Interrupt) -> StashResult<()> {
    let caches = configured_caches(config)?;
    let env = build_env(&args.target);
    let ctx = execution_context(config, &args.target, env.clone(), interrupt)?;
    let store_root = ConfigManager::store_root(config);

    let ui_ctx = UiContext::detect();
    ui::intro(&ui_ctx, "Seeding caches");

    let result = seed_all(&ui_ctx, &caches, &store_root, &ctx, &env).await;
    finish(&ctx, result).await
}

async fn seed_all(
    ui_ctx: &UiContext,
    caches: &[Box<dyn Cache>],
    store_root: &Path,
    ctx: &ExecutionContext,
    initial_env: &BTreeMap<String, String>,
) -> StashResult<()> {
    let mut seeded = 0usize;

    for cache in caches {
        let mut spinner = TaskSpinner::new(ui_ctx);
        spinner.start(&format!("Seeding {}", cache.key()));

        match cache.seed(store_root, ctx, initial_env).await {
            Ok(TransferOutcome::Skipped) => {
                spinner.stop_warn(&format!("{}: nothing stored yet", cache.key()))
            }
            Ok(_) => {
                seeded += 1;
                spinner.stop(&format!("{} restored", cache.key()));
            }
            Err(e) => {
                spinner.stop_error(&format!("{}: {}", cache.key(), e));
                return Err(e);
            }
        }
    }

    ui::outro_success(
        ui_ctx,
        &format!("Restored {} of {} cache(s)", seeded, caches.len()),
    );
    Ok(())
}
