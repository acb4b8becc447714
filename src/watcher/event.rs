use std::fmt;
use std::fs;
use std::path::Path;

use crate::replicate::permission_bits;

/// What happened to a watched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsChangeKind {
    Created,
    Modified,
    Removed,
    /// Same parent directory, new name. Path is `"<old> -> <new>"`.
    Renamed,
    PermissionChanged,
    /// Different parent directory. Path is `"<old> -> <new>"`.
    Moved,
}

impl fmt::Display for FsChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATE",
            Self::Modified => "WRITE",
            Self::Removed => "REMOVE",
            Self::Renamed => "RENAME",
            Self::PermissionChanged => "CHMOD",
            Self::Moved => "MOVE",
        };
        f.write_str(name)
    }
}

/// Metadata kept for a snapshot entry or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub is_dir: bool,
    pub len: u64,
    /// POSIX permission bits (`0o7777` mask).
    pub mode: u32,
}

impl EntryMeta {
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            is_dir: meta.is_dir(),
            len: if meta.is_dir() { 0 } else { meta.len() },
            mode: permission_bits(meta),
        }
    }

    /// Stat `path`, following symlinks. `None` if it no longer exists.
    pub fn probe(path: &Path) -> Option<Self> {
        fs::metadata(path).ok().map(|m| Self::from_metadata(&m))
    }
}

/// One notification from the watch subsystem, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChangeEvent {
    pub kind: FsChangeKind,
    /// Absolute path, or `"<old> -> <new>"` for renames and moves.
    pub path: String,
    pub is_dir: bool,
    /// Metadata observed when the event was classified; absent for removals.
    pub info: Option<EntryMeta>,
}

impl FsChangeEvent {
    pub fn new(kind: FsChangeKind, path: impl Into<String>, info: Option<EntryMeta>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_dir: info.is_some_and(|m| m.is_dir),
            info,
        }
    }
}

impl fmt::Display for FsChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.is_dir { "DIRECTORY" } else { "FILE" };
        write!(f, "{what} {:?} {}", self.path, self.kind)
    }
}
