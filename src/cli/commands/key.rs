//! Key command - show where a cache key lives in the store

use crate::cache::derive_cache_path;
use crate::cli::args::KeyArgs;
use crate::config::{Config, ConfigManager};
use crate::error::StashResult;

/// Execute the key command
pub async fn execute(args: KeyArgs, config: &Config) -> StashResult<()> {
    let root = ConfigManager::store_root(config);
    println!("{}", derive_cache_path(&root, &args.key).display());
    Ok(())
}
