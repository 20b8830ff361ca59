//! Save command - store caches after a build

use super::{build_env, configured_caches, execution_context, finish};
use crate::cache::size::{mb_to_bytes, percentage};
use crate::cache::{format_bytes, Cache, SizeStatus};
use crate::cli::args::SaveArgs;
use crate::config::{Config, ConfigManager};
use crate::error::StashResult;
use crate::remote::{ExecutionContext, Interrupt};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use tracing::info;

/// Execute the save command
pub async fn execute(args: SaveArgs, config: &Config, interrupt: Interrupt) -> StashResult<()> {
    let caches = configured_caches(config)?;
    let env = build_env(&args.target);
    let ctx = execution_context(config, &args.target, env, interrupt)?;
    let store_root = ConfigManager::store_root(config);

    let ui_ctx = UiContext::detect();
    ui::intro(&ui_ctx, "Saving caches");

    let limit = mb_to_bytes(config.store.max_size_mb);
    let result: StashResult<()> = async {
        if limit > 0 && !within_limit(&ui_ctx, &caches, &ctx, limit, args.force).await? {
            return Ok(());
        }
        save_all(&ui_ctx, &caches, &store_root, &ctx).await
    }
    .await;

    finish(&ctx, result).await
}

/// Apply `store.max_size_mb`; false means saving is skipped
async fn within_limit(
    ui_ctx: &UiContext,
    caches: &[Box<dyn Cache>],
    ctx: &ExecutionContext,
    limit: u64,
    force: bool,
) -> StashResult<bool> {
    let mut spinner = TaskSpinner::new(ui_ctx);
    spinner.start("Measuring caches");

    let mut total = 0u64;
    for cache in caches {
        match cache.calculate_size(ctx).await {
            Ok(bytes) => total = total.saturating_add(bytes),
            Err(e) => {
                spinner.stop_error(&format!("Measuring {} failed", cache.key()));
                return Err(e);
            }
        }
    }
    spinner.stop(&format!("Caches measure {}", format_bytes(total)));

    let usage = format!(
        "{} of {} ({:.0}%)",
        format_bytes(total),
        format_bytes(limit),
        percentage(total, limit)
    );
    match SizeStatus::from_usage(total, limit) {
        SizeStatus::Ok => Ok(true),
        SizeStatus::Warning => {
            ui::step_warn(ui_ctx, &format!("Caches are close to the limit: {}", usage));
            Ok(true)
        }
        SizeStatus::Exceeded if force => {
            ui::step_warn(ui_ctx, &format!("Saving over the limit: {}", usage));
            Ok(true)
        }
        SizeStatus::Exceeded => {
            info!("Skipping save, caches exceed store.max_size_mb");
            ui::step_warn_hint(
                ui_ctx,
                &format!("Caches exceed the size limit: {}", usage),
                "Use --force to save anyway",
            );
            ui::outro_warn(ui_ctx, "Nothing saved");
            Ok(false)
        }
    }
}

async fn save_all(
    ui_ctx: &UiContext,
    caches: &[Box<dyn Cache>],
    store_root: &Path,
    ctx: &ExecutionContext,
) -> StashResult<()> {
    for cache in caches {
        let mut spinner = TaskSpinner::new(ui_ctx);
        spinner.start(&format!("Saving {}", cache.key()));

        if let Err(e) = cache.save(store_root, ctx).await {
            spinner.stop_error(&format!("{}: {}", cache.key(), e));
            return Err(e);
        }
        spinner.stop(&format!("{} stored", cache.key()));
    }

    ui::outro_success(ui_ctx, &format!("Saved {} cache(s)", caches.len()));
    Ok(())
}
