use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::watcher::event::EntryMeta;

/// Hidden-file and glob exclusion rules shared by the initial walk and the watcher.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    ignore_hidden: bool,
    patterns: Vec<glob::Pattern>,
}

impl PathFilter {
    pub fn new(ignore_hidden: bool, patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!("ignoring invalid exclude pattern {p:?}: {err}");
                    None
                }
            })
            .collect();
        Self {
            ignore_hidden,
            patterns,
        }
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(config.ignore_hidden, config.exclude.as_deref().unwrap_or_default())
    }

    /// Returns true if `relative` (a path below a root) should not be mirrored.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.ignore_hidden && relative.components().any(is_hidden) {
            return true;
        }
        if self.patterns.is_empty() {
            return false;
        }

        let path_str = relative.to_string_lossy();
        self.patterns.iter().any(|pattern| {
            pattern.matches(&path_str)
                || relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .any(|s| pattern.matches(s))
        })
    }
}

fn is_hidden(component: Component<'_>) -> bool {
    match component {
        Component::Normal(name) => name.to_str().is_some_and(|s| s.starts_with('.')),
        _ => false,
    }
}

/// Point-in-time mapping from relative path to metadata.
///
/// Keys are the relative paths exactly as found on disk, so names that are
/// not valid UTF-8 still resolve back to the real entry. Component-wise
/// ordering puts every directory before its contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    entries: BTreeMap<PathBuf, EntryMeta>,
}

impl TreeSnapshot {
    pub fn insert(&mut self, relative: PathBuf, meta: EntryMeta) {
        self.entries.insert(relative, meta);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &EntryMeta)> {
        self.entries.iter().map(|(path, meta)| (path.as_path(), meta))
    }

    pub fn dir_count(&self) -> usize {
        self.entries.values().filter(|m| m.is_dir).count()
    }

    pub fn file_count(&self) -> usize {
        self.entries.values().filter(|m| !m.is_dir).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|m| m.len).sum()
    }
}

/// Slash-joined form of a relative path, independent of the host separator.
pub fn slash_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively walk `root` and snapshot every entry below it.
///
/// The root itself is not part of the snapshot. Any walk or stat error is
/// returned rather than skipped, so callers never act on a partial view.
pub fn walk_tree(root: &Path, filter: &PathFilter) -> MirrorResult<TreeSnapshot> {
    let walk_err = |message: String| MirrorError::Walk {
        root: root.to_path_buf(),
        message,
    };
    if !root.is_dir() {
        return Err(walk_err("not a directory".to_string()));
    }

    let prune_root: PathBuf = root.to_path_buf();
    let prune_filter = filter.clone();
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| match entry.path().strip_prefix(&prune_root) {
            Ok(relative) => relative.as_os_str().is_empty() || !prune_filter.is_excluded(relative),
            Err(_) => true,
        })
        .build();

    let mut snapshot = TreeSnapshot::default();
    for result in walker {
        let entry = result.map_err(|err| walk_err(err.to_string()))?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let meta = std::fs::metadata(path).map_err(|e| MirrorError::lookup(path, e))?;
        snapshot.insert(relative.to_path_buf(), EntryMeta::from_metadata(&meta));
    }

    Ok(snapshot)
}
