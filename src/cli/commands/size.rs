//! Size command - measure what each cache would store

use super::{build_env, configured_caches, execution_context, finish};
use crate::cache::{format_bytes, Cache};
use crate::cli::args::{OutputFormat, SizeArgs};
use crate::config::Config;
use crate::error::StashResult;
use crate::remote::{ExecutionContext, Interrupt};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

/// One measured cache
#[derive(Debug, Serialize)]
struct CacheSize {
    key: String,
    title: &'static str,
    bytes: u64,
}

/// Execute the size command
pub async fn execute(args: SizeArgs, config: &Config, interrupt: Interrupt) -> StashResult<()> {
    let caches = configured_caches(config)?;
    let env = build_env(&args.target);
    let ctx = execution_context(config, &args.target, env, interrupt)?;

    let result = match measure_all(&caches, &ctx).await {
        Ok(sizes) => match args.format {
            OutputFormat::Table => {
                print_table(&sizes);
                Ok(())
            }
            OutputFormat::Json => print_json(&sizes),
            OutputFormat::Plain => {
                print_plain(&sizes);
                Ok(())
            }
        },
        Err(e) => Err(e),
    };

    finish(&ctx, result).await
}

async fn measure_all(
    caches: &[Box<dyn Cache>],
    ctx: &ExecutionContext,
) -> StashResult<Vec<CacheSize>> {
    let mut sizes = Vec::with_capacity(caches.len());
    for cache in caches {
        sizes.push(CacheSize {
            key: cache.key().to_string(),
            title: cache.title(),
            bytes: cache.calculate_size(ctx).await?,
        });
    }
    Ok(sizes)
}

fn print_table(sizes: &[CacheSize]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Cache sizes");

    println!(
        "{:<40} {:<22} {:>12}",
        style("CACHE").bold(),
        style("TYPE").bold(),
        style("SIZE").bold()
    );
    println!("{}", "-".repeat(76));

    for size in sizes {
        println!(
            "{:<40} {:<22} {:>12}",
            size.key,
            size.title,
            format_bytes(size.bytes)
        );
    }

    let total: u64 = sizes.iter().map(|s| s.bytes).sum();
    println!();
    println!("{} cache(s), {} total", sizes.len(), format_bytes(total));
}

fn print_json(sizes: &[CacheSize]) -> StashResult<()> {
    let json = serde_json::to_string_pretty(sizes)?;
    println!("{}", json);
    Ok(())
}

fn print_plain(sizes: &[CacheSize]) {
    for size in sizes {
        println!("{}\t{}", size.bytes, size.key);
    }
}
