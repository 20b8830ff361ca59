//! Integration tests for buildstash

use buildstash::config::schema::{CacheConfig, ExecutorKind};
use buildstash::config::Config;
use std::fs;
use std::path::{Path, PathBuf};

fn agent_command() -> Vec<String> {
    vec![env!("CARGO_BIN_EXE_buildstash").to_string(), "agent".to_string()]
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

fn test_config(store: &Path, kind: ExecutorKind, cache_path: &str) -> Config {
    let mut config = Config::default();
    config.store.root = Some(store.to_path_buf());
    config.executor.kind = kind;
    if kind == ExecutorKind::Process {
        config.executor.command = agent_command();
    }
    config.caches.push(CacheConfig {
        path: cache_path.to_string(),
        ..CacheConfig::default()
    });
    config
}

fn write_config(dir: &Path, config: &Config) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, toml::to_string_pretty(config).unwrap()).unwrap();
    path
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use buildstash::cache::{cache_key_digest, derive_cache_path};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn stash(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("buildstash");
        cmd.arg("--no-local").arg("-c").arg(config);
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("buildstash")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Build-artifact cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("buildstash")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("buildstash"));
    }

    #[test]
    fn config_path_uses_flag() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("custom.toml");
        stash(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        stash(&temp.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("nested/config.toml");
        stash(&config).args(["config", "init"]).assert().success();
        assert!(config.is_file());
    }

    #[test]
    fn invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        fs::write(&config, "[executor]\nkind = \"docker\"\n").unwrap();
        stash(&config)
            .args(["key", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn key_prints_store_path() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let config = write_config(
            temp.path(),
            &test_config(&store, ExecutorKind::Local, "node_modules"),
        );

        let expected = derive_cache_path(&store, "node_modules");
        stash(&config)
            .args(["key", "node_modules"])
            .assert()
            .success()
            .stdout(predicate::str::contains(cache_key_digest("node_modules")))
            .stdout(predicate::str::contains(expected.display().to_string()));
    }

    #[test]
    fn seed_without_caches_fails_with_hint() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path(), &Config::default());
        stash(&config)
            .arg("seed")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No caches configured"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn first_seed_skips() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("ws");
        fs::create_dir_all(&workspace).unwrap();
        let config = write_config(
            temp.path(),
            &test_config(&temp.path().join("store"), ExecutorKind::Local, "deps"),
        );

        stash(&config)
            .args(["seed", "--workspace"])
            .arg(&workspace)
            .assert()
            .success()
            .stdout(predicate::str::contains("nothing stored yet"));
        assert!(!workspace.join("deps").exists());
    }

    fn save_then_seed(kind: ExecutorKind) {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let first = temp.path().join("first");
        write_tree(
            &first,
            &[
                ("deps/a.txt", "aaa"),
                ("deps/lib/b.txt", "bbb"),
                ("deps/.git/config", "vcs"),
            ],
        );
        let config = write_config(temp.path(), &test_config(&store, kind, "deps"));

        stash(&config)
            .args(["save", "--workspace"])
            .arg(&first)
            .assert()
            .success();
        assert!(derive_cache_path(&store, "deps").join("archive.tgz").is_file());

        let second = temp.path().join("second");
        fs::create_dir_all(&second).unwrap();
        stash(&config)
            .args(["seed", "--workspace"])
            .arg(&second)
            .assert()
            .success();

        assert_eq!(fs::read_to_string(second.join("deps/a.txt")).unwrap(), "aaa");
        assert_eq!(fs::read_to_string(second.join("deps/lib/b.txt")).unwrap(), "bbb");
        assert!(!second.join("deps/.git").exists());
    }

    #[test]
    fn save_then_seed_local() {
        save_then_seed(ExecutorKind::Local);
    }

    #[test]
    fn save_then_seed_through_agent() {
        save_then_seed(ExecutorKind::Process);
    }

    #[test]
    fn save_respects_size_limit() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("store");
        let workspace = temp.path().join("ws");
        fs::create_dir_all(workspace.join("big")).unwrap();
        fs::write(workspace.join("big/blob.bin"), vec![1u8; 2 * 1024 * 1024]).unwrap();

        let mut config = test_config(&store, ExecutorKind::Local, "big");
        config.store.max_size_mb = 1;
        let config = write_config(temp.path(), &config);
        let archive = derive_cache_path(&store, "big").join("archive.tgz");

        stash(&config)
            .args(["save", "--workspace"])
            .arg(&workspace)
            .assert()
            .success()
            .stdout(predicate::str::contains("exceed"));
        assert!(!archive.exists());

        stash(&config)
            .args(["save", "--force", "--workspace"])
            .arg(&workspace)
            .assert()
            .success();
        assert!(archive.is_file());
    }

    #[test]
    fn size_reports_json() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("ws");
        write_tree(
            &workspace,
            &[("out/a", "0123456789"), ("out/sub/b", "01234"), ("out/x~", "ignored")],
        );
        let config = write_config(
            temp.path(),
            &test_config(&temp.path().join("store"), ExecutorKind::Process, "out"),
        );

        let output = stash(&config)
            .args(["size", "--format", "json", "--workspace"])
            .arg(&workspace)
            .output()
            .unwrap();
        assert!(output.status.success());

        let sizes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(sizes[0]["key"], "out");
        assert_eq!(sizes[0]["bytes"], 15);
    }

    #[test]
    fn env_flag_expands_cache_path() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("ws");
        write_tree(&workspace, &[("cache-7/f", "1234")]);
        let config = write_config(
            temp.path(),
            &test_config(&temp.path().join("store"), ExecutorKind::Local, "cache-$SHARD"),
        );

        stash(&config)
            .args(["size", "--format", "plain", "-e", "SHARD=7", "--workspace"])
            .arg(&workspace)
            .assert()
            .success()
            .stdout(predicate::str::contains("4\tcache-$SHARD"));
    }

    #[test]
    fn agent_exits_on_eof() {
        cargo_bin_cmd!("buildstash")
            .arg("agent")
            .write_stdin(Vec::<u8>::new())
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }
}

mod channel_tests {
    use super::*;
    use buildstash::archive::Compression;
    use buildstash::cache::{ArbitraryFileCache, Cache, FilterSpec, TransferOutcome};
    use buildstash::remote::{
        interrupt_pair, ExecutionChannel, ExecutionContext, ProcessChannel, Request,
    };
    use buildstash::StashError;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn agent_context(workspace: &Path) -> ExecutionContext {
        let channel = ProcessChannel::new(agent_command()).unwrap();
        ExecutionContext::new(Arc::new(channel), workspace)
    }

    #[tokio::test]
    async fn save_and_seed_roundtrip() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write_tree(
            workspace.path(),
            &[
                ("node_modules/a/index.js", "a"),
                ("node_modules/b/index.js", "bb"),
                ("node_modules/b/package.json", "{}"),
            ],
        );

        let ctx = agent_context(workspace.path());
        let cache = ArbitraryFileCache::new(
            "node_modules",
            FilterSpec::new("**/*.js", "", true),
            Compression::Zstd,
        );

        assert_eq!(cache.calculate_size(&ctx).await.unwrap(), 3);
        assert_eq!(
            cache.save(store.path(), &ctx).await.unwrap(),
            TransferOutcome::Saved
        );

        fs::remove_dir_all(workspace.path().join("node_modules")).unwrap();
        let outcome = cache
            .seed(store.path(), &ctx, &BTreeMap::new())
            .await
            .unwrap();
        ctx.close().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Seeded);
        let restored = workspace.path().join("node_modules");
        assert_eq!(fs::read_to_string(restored.join("a/index.js")).unwrap(), "a");
        assert_eq!(fs::read_to_string(restored.join("b/index.js")).unwrap(), "bb");
        assert!(!restored.join("b/package.json").exists());
    }

    #[tokio::test]
    async fn seed_skips_missing_store_entry() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let ctx = agent_context(workspace.path());
        let cache = ArbitraryFileCache::new("target", FilterSpec::default(), Compression::Gzip);

        let outcome = cache
            .seed(store.path(), &ctx, &BTreeMap::new())
            .await
            .unwrap();
        ctx.close().await.unwrap();

        assert_eq!(outcome, TransferOutcome::Skipped);
        assert!(!workspace.path().join("target").exists());
    }

    #[tokio::test]
    async fn save_keeps_stale_store_files() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write_tree(workspace.path(), &[("target/out.o", "obj")]);

        let store_dir = buildstash::cache::derive_cache_path(store.path(), "target");
        write_tree(&store_dir, &[("leftover.tgz", "old")]);

        let ctx = agent_context(workspace.path());
        let cache = ArbitraryFileCache::new("target", FilterSpec::default(), Compression::Gzip);
        cache.save(store.path(), &ctx).await.unwrap();
        ctx.close().await.unwrap();

        assert!(store_dir.join("leftover.tgz").is_file());
        assert!(store_dir.join("archive.tgz").is_file());
    }

    #[tokio::test]
    async fn remote_failure_keeps_agent_usable() {
        let workspace = TempDir::new().unwrap();
        write_tree(workspace.path(), &[("file", "x")]);
        let ctx = agent_context(workspace.path());

        let failed = ctx
            .invoke(
                Request::EnsureDir {
                    path: workspace.path().join("file/child"),
                },
                None,
            )
            .await;
        assert!(matches!(failed, Err(StashError::Remote { .. })));

        ctx.invoke(
            Request::EnsureDir {
                path: workspace.path().join("dir"),
            },
            None,
        )
        .await
        .unwrap();
        ctx.close().await.unwrap();
        assert!(workspace.path().join("dir").is_dir());
    }

    #[tokio::test]
    async fn failed_save_leaves_no_blob() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write_tree(workspace.path(), &[("plain-file", "not a directory")]);

        let ctx = agent_context(workspace.path());
        let cache = ArbitraryFileCache::new("plain-file", FilterSpec::default(), Compression::Gzip);
        let result = cache.save(store.path(), &ctx).await;
        ctx.close().await.unwrap();

        assert!(matches!(result, Err(StashError::Remote { .. })));
        let store_dir = buildstash::cache::derive_cache_path(store.path(), "plain-file");
        assert_eq!(fs::read_dir(store_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn pre_fired_interrupt_is_interrupted() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        write_tree(workspace.path(), &[("deps/a", "a")]);

        let (handle, interrupt) = interrupt_pair();
        handle.trigger();
        let ctx = agent_context(workspace.path()).with_interrupt(interrupt);
        let cache = ArbitraryFileCache::new("deps", FilterSpec::default(), Compression::Gzip);

        let result = cache.save(store.path(), &ctx).await;
        ctx.close().await.unwrap();

        match result {
            Err(e) => assert!(e.is_interrupted(), "unexpected error {e}"),
            Ok(outcome) => panic!("expected interruption, got {outcome}"),
        }
        let store_dir = buildstash::cache::derive_cache_path(store.path(), "deps");
        assert!(!store_dir.join("archive.tgz").exists());
    }

    /// Bytes that gzip cannot shrink, so archiving them takes a while
    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed | 1;
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            bytes.extend_from_slice(&state.to_le_bytes());
        }
        bytes.truncate(len);
        bytes
    }

    fn partial_len(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn interrupted_transfer_abandons_agent() {
        let store = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        let deps = workspace.path().join("deps");
        fs::create_dir_all(&deps).unwrap();
        for i in 0..8u64 {
            fs::write(deps.join(format!("blob-{i}")), noise(2 << 20, i + 1)).unwrap();
        }

        let channel = Arc::new(ProcessChannel::new(agent_command()).unwrap());
        let (handle, interrupt) = interrupt_pair();
        let ctx = ExecutionContext::new(channel.clone(), workspace.path()).with_interrupt(interrupt);
        let cache = ArbitraryFileCache::new("deps", FilterSpec::default(), Compression::Gzip);
        let store_dir = buildstash::cache::derive_cache_path(store.path(), "deps");

        // Fire once archive bytes reach the store
        let watched = store_dir.clone();
        let trigger = tokio::spawn(async move {
            while partial_len(&watched) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            handle.trigger();
        });

        let result = cache.save(store.path(), &ctx).await;
        trigger.await.unwrap();
        assert!(matches!(result, Err(StashError::Interrupted)));

        let again = channel
            .dispatch(
                Request::EnsureDir {
                    path: workspace.path().join("later"),
                },
                None,
            )
            .await;
        assert!(matches!(again, Err(StashError::ChannelAbandoned)));
        assert!(!workspace.path().join("later").exists());

        channel.close().await.unwrap();
        assert_eq!(fs::read_dir(&store_dir).unwrap().count(), 0);
    }
}
