//! Cache for an arbitrary directory of the workspace

use super::{derive_cache_path, transfer_path, Cache, Direction, FilterSpec, TransferOutcome};
use crate::archive::{create_strategy, ArchiveStrategy, Compression};
use crate::config::schema::CacheConfig;
use crate::error::StashResult;
use crate::remote::{ExecutionContext, Request};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Caches one directory, given relative to the workspace or absolute
///
/// The path may reference build variables as `$VAR` or `${VAR}`. The store
/// key is the path as configured, before expansion.
#[derive(Debug, Clone)]
pub struct ArbitraryFileCache {
    path: String,
    filter: FilterSpec,
    compression: Compression,
}

impl ArbitraryFileCache {
    pub fn new(path: impl Into<String>, filter: FilterSpec, compression: Compression) -> Self {
        Self {
            path: path.into(),
            filter,
            compression,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.path.clone(), config.filter(), config.compression)
    }

    fn strategy(&self) -> Box<dyn ArchiveStrategy> {
        create_strategy(self.compression)
    }

    /// Directory on the execution node for the given environment
    fn resolve(&self, ctx: &ExecutionContext, env: &BTreeMap<String, String>) -> PathBuf {
        let resolved = ctx.resolve(expand_vars(&self.path, env));
        debug!("Resolved {} to {}", self.path, resolved.display());
        resolved
    }
}

#[async_trait]
impl Cache for ArbitraryFileCache {
    fn title(&self) -> &'static str {
        "Arbitrary File Cache"
    }

    fn key(&self) -> &str {
        &self.path
    }

    async fn calculate_size(&self, ctx: &ExecutionContext) -> StashResult<u64> {
        let root = self.resolve(ctx, ctx.env());
        ctx.invoke(
            Request::MeasureSize {
                root,
                filter: self.filter.clone(),
            },
            None,
        )
        .await?
        .expect_size()
    }

    async fn seed(
        &self,
        cache_root: &Path,
        ctx: &ExecutionContext,
        initial_env: &BTreeMap<String, String>,
    ) -> StashResult<TransferOutcome> {
        let strategy = self.strategy();
        transfer_path(
            Direction::Seed,
            &derive_cache_path(cache_root, &self.path),
            ctx,
            &self.resolve(ctx, initial_env),
            &self.filter,
            strategy.as_ref(),
        )
        .await
    }

    async fn save(&self, cache_root: &Path, ctx: &ExecutionContext) -> StashResult<TransferOutcome> {
        let strategy = self.strategy();
        transfer_path(
            Direction::Save,
            &derive_cache_path(cache_root, &self.path),
            ctx,
            &self.resolve(ctx, ctx.env()),
            &self.filter,
            strategy.as_ref(),
        )
        .await
    }
}

/// Substitute `$VAR` and `${VAR}` from `env`
///
/// Unknown variables and malformed references are left as written.
pub fn expand_vars(input: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if is_var_name(&braced[..end]) => (&braced[..end], end + 2),
                _ => ("", 0),
            }
        } else {
            let end = after
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_alphanumeric() || *c == '_') || (*i == 0 && c.is_ascii_digit()))
                .map_or(after.len(), |(i, _)| i);
            (&after[..end], end)
        };

        match env.get(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(value),
            None => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_key_digest;
    use crate::remote::LocalChannel;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expand_plain_and_braced() {
        let vars = env(&[("HOME", "/home/ci"), ("JOB", "web")]);
        assert_eq!(expand_vars("$HOME/.m2", &vars), "/home/ci/.m2");
        assert_eq!(expand_vars("${JOB}_cache", &vars), "web_cache");
        assert_eq!(expand_vars("a/$JOB/${HOME}", &vars), "a/web//home/ci");
    }

    #[test]
    fn expand_leaves_unknown_and_malformed() {
        let vars = env(&[("A", "x")]);
        assert_eq!(expand_vars("$MISSING/dir", &vars), "$MISSING/dir");
        assert_eq!(expand_vars("${MISSING}", &vars), "${MISSING}");
        assert_eq!(expand_vars("${A", &vars), "${A");
        assert_eq!(expand_vars("cost$", &vars), "cost$");
        assert_eq!(expand_vars("$1", &vars), "$1");
        assert_eq!(expand_vars("no vars", &vars), "no vars");
    }

    #[test]
    fn var_name_rules() {
        assert!(is_var_name("_A1"));
        assert!(!is_var_name("1A"));
        assert!(!is_var_name(""));
        assert!(!is_var_name("A-B"));
    }

    #[tokio::test]
    async fn key_is_unexpanded_path() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("out-1")).unwrap();
        std::fs::write(workspace.path().join("out-1/f"), "1").unwrap();

        let ctx = ExecutionContext::new(Arc::new(LocalChannel::new()), workspace.path())
            .with_env(env(&[("BUILD", "1")]));
        let cache = ArbitraryFileCache::new("out-$BUILD", FilterSpec::default(), Compression::Gzip);

        cache.save(store.path(), &ctx).await.unwrap();

        let expected = store.path().join(cache_key_digest("out-$BUILD")).join("archive.tgz");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn seed_expands_against_initial_env() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::create_dir_all(workspace.path().join("src")).unwrap();
        std::fs::write(workspace.path().join("src/f"), "data").unwrap();

        let cache = ArbitraryFileCache::new("$DIR", FilterSpec::default(), Compression::Gzip);
        let save_ctx = ExecutionContext::new(Arc::new(LocalChannel::new()), workspace.path())
            .with_env(env(&[("DIR", "src")]));
        cache.save(store.path(), &save_ctx).await.unwrap();

        let seed_ctx = ExecutionContext::new(Arc::new(LocalChannel::new()), workspace.path())
            .with_env(env(&[("DIR", "ignored")]));
        let outcome = cache
            .seed(store.path(), &seed_ctx, &env(&[("DIR", "dst")]))
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Seeded);
        assert_eq!(
            std::fs::read_to_string(workspace.path().join("dst/f")).unwrap(),
            "data"
        );
        assert!(!workspace.path().join("ignored").exists());
    }

    #[tokio::test]
    async fn calculate_size_uses_filter() {
        let workspace = TempDir::new().unwrap();
        let dir = workspace.path().join("node_modules");
        std::fs::create_dir_all(dir.join("pkg")).unwrap();
        std::fs::write(dir.join("pkg/a.js"), vec![b'a'; 100]).unwrap();
        std::fs::write(dir.join("pkg/b.js"), vec![b'b'; 150]).unwrap();
        std::fs::write(dir.join("c.js"), vec![b'c'; 50]).unwrap();
        std::fs::write(dir.join("debug.log"), vec![b'd'; 1000]).unwrap();

        let ctx = ExecutionContext::new(Arc::new(LocalChannel::new()), workspace.path());
        let cache = ArbitraryFileCache::new(
            "node_modules",
            FilterSpec::new("**/*.js", "", true),
            Compression::Gzip,
        );

        assert_eq!(cache.calculate_size(&ctx).await.unwrap(), 300);
    }
}
