//! Streaming tar archiver for the execution node
//!
//! Archives are written and read as streams; neither direction holds the
//! tree or the archive in memory.

use super::{StopFlag, Stoppable};
use crate::archive::Compression;
use crate::cache::FilterSpec;
use crate::error::{StashError, StashResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

const ZSTD_LEVEL: i32 = 3;

/// Compressing writer over an archive sink
enum Encoder<W: Write> {
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
    Plain(W),
}

impl<W: Write> Encoder<W> {
    fn new(compression: Compression, inner: W) -> io::Result<Self> {
        Ok(match compression {
            Compression::Gzip => Self::Gzip(GzEncoder::new(inner, flate2::Compression::default())),
            Compression::Zstd => Self::Zstd(zstd::Encoder::new(inner, ZSTD_LEVEL)?),
            Compression::None => Self::Plain(inner),
        })
    }

    /// Write the codec trailer and hand back the sink
    fn finish(self) -> io::Result<W> {
        match self {
            Self::Gzip(encoder) => encoder.finish(),
            Self::Zstd(encoder) => encoder.finish(),
            Self::Plain(inner) => Ok(inner),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(encoder) => encoder.write(buf),
            Self::Zstd(encoder) => encoder.write(buf),
            Self::Plain(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(encoder) => encoder.flush(),
            Self::Zstd(encoder) => encoder.flush(),
            Self::Plain(inner) => inner.flush(),
        }
    }
}

fn decoder<'a, R: Read + 'a>(compression: Compression, inner: R) -> io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::Gzip => Box::new(GzDecoder::new(inner)),
        Compression::Zstd => Box::new(zstd::Decoder::new(inner)?),
        Compression::None => Box::new(inner),
    })
}

/// Write the filtered contents of `source` as a compressed tar stream
///
/// Regular files and symlinks are stored under their `/`-separated path
/// relative to `source`, with mode and mtime. Other special files are
/// skipped. A missing `source` produces a valid, empty archive.
pub fn write_archive<W: Write>(
    source: &Path,
    filter: &FilterSpec,
    compression: Compression,
    sink: W,
    stop: &StopFlag,
) -> StashResult<W> {
    let compiled = filter.compile()?;

    let source_exists = match fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => true,
        Ok(_) => {
            return Err(StashError::io(
                format!("archiving {}", source.display()),
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(StashError::io(format!("reading {}", source.display()), e)),
    };

    let encoder = Encoder::new(compression, sink)
        .map_err(|e| StashError::io("starting archive encoder", e))?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    if source_exists {
        compiled.scan(source, |entry, rel| {
            stop.check()?;
            let file_type = entry.file_type();
            if file_type.is_file() {
                append_file(&mut builder, entry.path(), rel, stop)?;
            } else if file_type.is_symlink() {
                builder
                    .append_path_with_name(entry.path(), rel)
                    .map_err(|e| StashError::io(format!("archiving {}", entry.path().display()), e))?;
            } else {
                debug!("Skipping special file {}", entry.path().display());
                return Ok(());
            }
            entries += 1;
            Ok(())
        })?;
    } else {
        debug!("{} does not exist, writing empty archive", source.display());
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| StashError::io("finishing tar stream", e))?;
    let mut sink = encoder
        .finish()
        .map_err(|e| StashError::io(format!("finishing {compression} stream"), e))?;
    sink.flush()
        .map_err(|e| StashError::io("flushing archive", e))?;

    debug!("Archived {} entries from {}", entries, source.display());
    Ok(sink)
}

/// Append a regular file, reading it through the stop flag
fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    rel: &str,
    stop: &StopFlag,
) -> StashResult<()> {
    let context = || format!("archiving {}", path.display());
    let file = File::open(path).map_err(|e| StashError::io(context(), e))?;
    let metadata = file.metadata().map_err(|e| StashError::io(context(), e))?;

    let mut header = tar::Header::new_gnu();
    header.set_metadata_in_mode(&metadata, tar::HeaderMode::Complete);
    // A file growing under us must not overrun its header size
    let data = Stoppable::new(file.take(metadata.len()), stop);
    builder
        .append_data(&mut header, rel, data)
        .map_err(|e| StashError::io(context(), e))
}

/// Unpack a compressed tar stream into `target`
///
/// Creates `target` if needed and overwrites conflicting entries. Files
/// already in `target` that are not in the archive are left alone. Returns
/// the number of entries unpacked.
pub fn extract_archive<R: Read>(
    compression: Compression,
    source: R,
    target: &Path,
    stop: &StopFlag,
) -> StashResult<usize> {
    fs::create_dir_all(target)
        .map_err(|e| StashError::io(format!("creating {}", target.display()), e))?;

    let decoder = decoder(compression, Stoppable::new(source, stop))
        .map_err(|e| StashError::io(format!("starting {compression} decoder"), e))?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    let mut unpacked = 0usize;
    let entries = archive
        .entries()
        .map_err(|e| StashError::io("reading archive", e))?;
    for entry in entries {
        stop.check()?;
        let mut entry = entry.map_err(|e| StashError::io("reading archive entry", e))?;
        let name = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
        let inside = entry
            .unpack_in(target)
            .map_err(|e| StashError::io(format!("unpacking {name}"), e))?;
        if inside {
            unpacked += 1;
        } else {
            warn!("Skipped archive entry outside {}: {}", target.display(), name);
        }
    }

    // Read through the codec trailer so truncated or corrupt streams fail here
    io::copy(&mut archive.into_inner(), &mut io::sink())
        .map_err(|e| StashError::io("reading archive trailer", e))?;

    debug!("Unpacked {} entries into {}", unpacked, target.display());
    Ok(unpacked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(root).unwrap();
                let rel = rel.to_string_lossy().replace('\\', "/");
                files.insert(rel, fs::read(entry.path()).unwrap());
            }
        }
        files
    }

    fn roundtrip(source: &Path, filter: &FilterSpec, compression: Compression) -> TempDir {
        let bytes = write_archive(source, filter, compression, Vec::new(), &StopFlag::default()).unwrap();
        let target = TempDir::new().unwrap();
        extract_archive(compression, Cursor::new(bytes), target.path(), &StopFlag::default()).unwrap();
        target
    }

    #[test]
    fn roundtrip_reproduces_filtered_tree() {
        let source = TempDir::new().unwrap();
        write(source.path(), "a.jar", b"alpha");
        write(source.path(), "lib/b.jar", b"beta");
        write(source.path(), "lib/notes.txt", b"skip me");
        write(source.path(), ".git/HEAD", b"ref: main");

        let filter = FilterSpec::new("**/*.jar", "", true);
        for compression in [Compression::Gzip, Compression::Zstd, Compression::None] {
            let target = roundtrip(source.path(), &filter, compression);

            let mut expected = BTreeMap::new();
            expected.insert("a.jar".to_string(), b"alpha".to_vec());
            expected.insert("lib/b.jar".to_string(), b"beta".to_vec());
            assert_eq!(snapshot(target.path()), expected, "{compression}");
        }
    }

    #[test]
    fn missing_source_gives_empty_archive() {
        let dir = TempDir::new().unwrap();
        let target = roundtrip(&dir.path().join("absent"), &FilterSpec::default(), Compression::Gzip);
        assert!(snapshot(target.path()).is_empty());
    }

    #[test]
    fn file_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "plain", b"x");
        let result = write_archive(&dir.path().join("plain"), &FilterSpec::default(), Compression::Gzip, Vec::new(), &StopFlag::default());
        assert!(matches!(result, Err(StashError::Io { .. })));
    }

    #[test]
    fn extract_creates_target_and_overwrites() {
        let source = TempDir::new().unwrap();
        write(source.path(), "shared.txt", b"new");
        let bytes = write_archive(source.path(), &FilterSpec::default(), Compression::Gzip, Vec::new(), &StopFlag::default()).unwrap();

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/target");
        write(&target, "shared.txt", b"old contents");
        write(&target, "local-only.txt", b"kept");

        let count = extract_archive(Compression::Gzip, Cursor::new(bytes), &target, &StopFlag::default()).unwrap();

        assert_eq!(count, 1);
        assert_eq!(fs::read(target.join("shared.txt")).unwrap(), b"new");
        assert_eq!(fs::read(target.join("local-only.txt")).unwrap(), b"kept");
    }

    #[test]
    fn truncated_archive_fails() {
        let source = TempDir::new().unwrap();
        write(source.path(), "big.bin", &vec![7u8; 64 * 1024]);
        let bytes = write_archive(source.path(), &FilterSpec::default(), Compression::Gzip, Vec::new(), &StopFlag::default()).unwrap();

        let target = TempDir::new().unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(extract_archive(Compression::Gzip, Cursor::new(truncated), target.path(), &StopFlag::default()).is_err());
    }

    /// Sink that stops the flag once the first bytes arrive
    struct StopOnWrite {
        stop: StopFlag,
        written: Vec<u8>,
    }

    impl Write for StopOnWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.stop.stop();
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stop_interrupts_archiving() {
        let source = TempDir::new().unwrap();
        write(source.path(), "a.bin", &vec![1u8; 4096]);
        write(source.path(), "b.bin", &vec![2u8; 4096]);

        let stop = StopFlag::default();
        let sink = StopOnWrite {
            stop: stop.clone(),
            written: Vec::new(),
        };
        let result = write_archive(source.path(), &FilterSpec::default(), Compression::None, sink, &stop);
        assert!(result.is_err());
    }

    #[test]
    fn stop_interrupts_extraction() {
        let source = TempDir::new().unwrap();
        write(source.path(), "a.txt", b"a");
        let bytes = write_archive(source.path(), &FilterSpec::default(), Compression::None, Vec::new(), &StopFlag::default()).unwrap();

        let target = TempDir::new().unwrap();
        let stop = StopFlag::default();
        stop.stop();
        assert!(extract_archive(Compression::None, Cursor::new(bytes), target.path(), &stop).is_err());
        assert!(snapshot(target.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_and_modes_survive() {
        use std::os::unix::fs::PermissionsExt;

        let source = TempDir::new().unwrap();
        write(source.path(), "bin/tool", b"#!/bin/sh\n");
        fs::set_permissions(source.path().join("bin/tool"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("tool", source.path().join("bin/alias")).unwrap();

        let target = roundtrip(source.path(), &FilterSpec::default(), Compression::Zstd);

        let mode = fs::metadata(target.path().join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let link = fs::read_link(target.path().join("bin/alias")).unwrap();
        assert_eq!(link, Path::new("tool"));
    }
}
