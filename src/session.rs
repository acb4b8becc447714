use std::path::{Component, Path, PathBuf};

use crate::error::{MirrorError, MirrorResult};

/// Roots of one mirroring run plus the absolute prefix the watch subsystem
/// puts in front of every path it reports.
///
/// Created once per process; the watch base never changes after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSession {
    source_root: PathBuf,
    dest_root: PathBuf,
    watch_base: PathBuf,
}

impl WatchSession {
    /// Build a session whose watch base is `cwd + "/" + source_root`.
    ///
    /// An absolute `source_root` is its own watch base.
    pub fn new(
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
    ) -> MirrorResult<Self> {
        let cwd = std::env::current_dir().map_err(|e| MirrorError::lookup(".", e))?;
        Ok(Self::from_process_dir(&cwd, source_root, dest_root))
    }

    /// Same as [`WatchSession::new`] but with an explicit process directory.
    pub fn from_process_dir(
        process_dir: &Path,
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
    ) -> Self {
        let source_root = normalize(&source_root.into());
        let dest_root = normalize(&dest_root.into());
        let watch_base = normalize(&process_dir.join(&source_root));
        Self {
            source_root,
            dest_root,
            watch_base,
        }
    }

    /// Session with a caller-chosen watch base (tests, embedding).
    pub fn with_watch_base(
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        watch_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_root: normalize(&source_root.into()),
            dest_root: normalize(&dest_root.into()),
            watch_base: normalize(&watch_base.into()),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    pub fn watch_base(&self) -> &Path {
        &self.watch_base
    }
}

/// Lexically clean a path: drop `.` components, fold `..` into its parent
/// where one exists. Never touches the filesystem, so symlinks are kept as
/// written.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
