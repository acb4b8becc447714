use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure turning a reported event path into mirror paths.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// The reported path does not live under the session's watch base.
    #[error("event path {path} is not under watch base {base}")]
    OutsideWatchBase { path: PathBuf, base: PathBuf },

    /// A rename/move path without the `" -> "` separator.
    #[error("rename event path {0:?} is missing the \" -> \" delimiter")]
    MissingRenameDelimiter(String),
}

/// Failure of a replication primitive or of the tree initializer.
///
/// Every I/O variant keeps the path it was operating on so the dispatch loop
/// can report something actionable before it stops.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// stat/open of a path that should exist but does not (or cannot be read).
    #[error("cannot look up {path}: {source}")]
    Lookup { path: PathBuf, source: io::Error },

    /// A directory or file could not be created.
    #[error("cannot create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    /// The byte stream between two open files failed.
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("cannot remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("cannot rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Applying permission bits to an existing entry failed.
    #[error("cannot set permissions on {path}: {source}")]
    Permission { path: PathBuf, source: io::Error },

    /// The recursive source walk itself reported an error.
    #[error("walk of {root} failed: {message}")]
    Walk { root: PathBuf, message: String },

    #[error(transparent)]
    Translate(#[from] TranslateError),
}

impl MirrorError {
    pub(crate) fn lookup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Lookup {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Create {
            path: path.into(),
            source,
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
