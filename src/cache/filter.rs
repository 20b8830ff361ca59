//! Include/exclude filtering for cached directory trees
//!
//! Patterns use Ant-style glob syntax, matched against `/`-separated paths
//! relative to the scanned root:
//!
//! - `*` and `?` never cross a `/`
//! - `**` spans any number of directories, including none
//! - a pattern ending in `/` matches everything below that directory
//! - several patterns may be given, separated by commas or whitespace
//!
//! The same compiled filter drives both the size probe and the archiver, so
//! a given spec always selects the same file set.

use crate::error::{StashError, StashResult};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Version-control and editor noise skipped when `use_default_excludes` is set
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    "**/CVS",
    "**/CVS/**",
    "**/.cvsignore",
    "**/SCCS",
    "**/SCCS/**",
    "**/vssver.scc",
    "**/.svn",
    "**/.svn/**",
    "**/.DS_Store",
    "**/.git",
    "**/.git/**",
    "**/.gitattributes",
    "**/.gitignore",
    "**/.gitmodules",
    "**/.hg",
    "**/.hg/**",
    "**/.hgignore",
    "**/.hgsub",
    "**/.hgsubstate",
    "**/.hgtags",
    "**/.bzr",
    "**/.bzr/**",
    "**/.bzrignore",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Which files of a directory tree take part in a cache operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// Patterns a file must match (empty = everything)
    pub includes: String,

    /// Patterns that remove a file from the selection
    pub excludes: String,

    /// Also exclude [`DEFAULT_EXCLUDES`]
    pub use_default_excludes: bool,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            includes: String::new(),
            excludes: String::new(),
            use_default_excludes: true,
        }
    }
}

impl FilterSpec {
    /// Create a filter spec
    pub fn new(
        includes: impl Into<String>,
        excludes: impl Into<String>,
        use_default_excludes: bool,
    ) -> Self {
        Self {
            includes: includes.into(),
            excludes: excludes.into(),
            use_default_excludes,
        }
    }

    /// Compile the pattern lists
    pub fn compile(&self) -> StashResult<CompiledFilter> {
        let mut includes = split_patterns(&self.includes)
            .map(AntGlob::parse)
            .collect::<StashResult<Vec<_>>>()?;
        if includes.is_empty() {
            includes.push(AntGlob::Everything);
        }

        let mut excludes = split_patterns(&self.excludes)
            .map(AntGlob::parse)
            .collect::<StashResult<Vec<_>>>()?;
        if self.use_default_excludes {
            for pattern in DEFAULT_EXCLUDES {
                excludes.push(AntGlob::parse(pattern)?);
            }
        }

        Ok(CompiledFilter { includes, excludes })
    }
}

fn split_patterns(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
}

/// A single Ant-style pattern
#[derive(Debug, Clone)]
enum AntGlob {
    /// `**`
    Everything,
    /// `dir/**`: anything below a directory matching the inner pattern
    Below(Pattern),
    Glob(Pattern),
}

impl AntGlob {
    fn parse(raw: &str) -> StashResult<Self> {
        let mut pattern = raw.replace('\\', "/");
        while let Some(rest) = pattern.strip_prefix("./") {
            pattern = rest.to_string();
        }
        let pattern = pattern.trim_start_matches('/');
        let pattern = if pattern.ends_with('/') {
            format!("{pattern}**")
        } else {
            pattern.to_string()
        };

        // `dir/**/**` selects the same files as `dir/**`
        let mut stem = pattern.as_str();
        let mut below = false;
        while let Some(dir) = stem.strip_suffix("/**").filter(|dir| !dir.is_empty()) {
            stem = dir;
            below = true;
        }

        if stem == "**" {
            return Ok(Self::Everything);
        }

        let compile = |p: &str| {
            Pattern::new(p).map_err(|e| StashError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.msg.to_string(),
            })
        };

        if below {
            Ok(Self::Below(compile(stem)?))
        } else {
            Ok(Self::Glob(compile(stem)?))
        }
    }

    fn matches(&self, rel: &str) -> bool {
        match self {
            Self::Everything => true,
            Self::Below(dir) => rel
                .match_indices('/')
                .any(|(i, _)| dir.matches_with(&rel[..i], MATCH_OPTIONS)),
            Self::Glob(pattern) => pattern.matches_with(rel, MATCH_OPTIONS),
        }
    }

    /// Whether every path below directory `rel` is matched
    fn covers_dir(&self, rel: &str) -> bool {
        match self {
            Self::Everything => true,
            Self::Below(dir) => dir.matches_with(rel, MATCH_OPTIONS),
            Self::Glob(_) => false,
        }
    }
}

/// A filter ready to be applied to directory walks
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    includes: Vec<AntGlob>,
    excludes: Vec<AntGlob>,
}

impl CompiledFilter {
    /// Whether a root-relative, `/`-separated path is selected
    pub fn matches(&self, rel: &str) -> bool {
        self.includes.iter().any(|g| g.matches(rel)) && !self.excludes.iter().any(|g| g.matches(rel))
    }

    /// Whether a directory can be skipped because nothing below it is selectable
    fn prunes_dir(&self, rel: &str) -> bool {
        self.excludes.iter().any(|g| g.covers_dir(rel))
    }

    /// Walk `root` and call `visit` for every selected non-directory entry
    ///
    /// Entries are visited in file-name order. Symlinks are reported, not
    /// followed. Any traversal error aborts the walk.
    pub fn scan<F>(&self, root: &Path, mut visit: F) -> StashResult<()>
    where
        F: FnMut(&DirEntry, &str) -> StashResult<()>,
    {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match relative_path(root, entry.path()) {
                    Some(rel) => !self.prunes_dir(&rel),
                    None => true,
                }
            });

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            if entry.depth() == 0 || entry.file_type().is_dir() {
                continue;
            }

            let rel = relative_path(root, entry.path()).ok_or_else(|| {
                StashError::Internal(format!(
                    "{} is not under {}",
                    entry.path().display(),
                    root.display()
                ))
            })?;

            if self.matches(&rel) {
                visit(&entry, &rel)?;
            }
        }

        Ok(())
    }
}

/// `/`-joined path of `path` relative to `root`
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn walk_error(root: &Path, err: walkdir::Error) -> StashError {
    let context = format!(
        "walking {}",
        err.path().unwrap_or(root).display()
    );
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    StashError::io(context, source)
}
