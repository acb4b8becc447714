use std::path::{Path, PathBuf};

use crate::error::TranslateError;
use crate::session::{WatchSession, normalize};

/// Separator the watch subsystem puts between the old and new absolute paths
/// of a rename or move event.
pub const RENAME_DELIMITER: &str = " -> ";

/// One event path expressed against both trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPathPair {
    /// Path below the watch base; empty for the root itself.
    pub relative: PathBuf,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
}

/// Paths derived from a `"<old> -> <new>"` event.
///
/// The old side is only resolved against the destination root: the source
/// entry is already gone, while the mirror still carries the pre-rename name.
/// The new side is resolved against both roots, with `new.source_path` naming
/// the settled location to read metadata from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePaths {
    pub old_relative: PathBuf,
    pub old_dest: PathBuf,
    pub new: MirrorPathPair,
}

/// Strip the watch base from an absolute event path.
///
/// Unlike plain substring removal this refuses paths that are not actually
/// below the base instead of letting them through unchanged.
pub fn relative_suffix(event_path: &Path, watch_base: &Path) -> Result<PathBuf, TranslateError> {
    let cleaned = normalize(event_path);
    cleaned
        .strip_prefix(watch_base)
        .map(Path::to_path_buf)
        .map_err(|_| TranslateError::OutsideWatchBase {
            path: cleaned.clone(),
            base: watch_base.to_path_buf(),
        })
}

/// Append a relative suffix to a root; the empty suffix yields the root as-is.
pub fn under_root(root: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Translate a single reported path into its source/destination pair.
pub fn translate(
    session: &WatchSession,
    event_path: &str,
) -> Result<MirrorPathPair, TranslateError> {
    let relative = relative_suffix(Path::new(event_path), session.watch_base())?;
    Ok(MirrorPathPair {
        source_path: under_root(session.source_root(), &relative),
        dest_path: under_root(session.dest_root(), &relative),
        relative,
    })
}

/// Split a rename/move event path on [`RENAME_DELIMITER`] and translate each side.
pub fn translate_rename(
    session: &WatchSession,
    event_path: &str,
) -> Result<RenamePaths, TranslateError> {
    let (old, new) = event_path
        .split_once(RENAME_DELIMITER)
        .ok_or_else(|| TranslateError::MissingRenameDelimiter(event_path.to_string()))?;

    let old_relative = relative_suffix(Path::new(old), session.watch_base())?;
    let old_dest = under_root(session.dest_root(), &old_relative);

    Ok(RenamePaths {
        old_relative,
        old_dest,
        new: translate(session, new)?,
    })
}

/// Encode an old/new pair the way rename and move events carry it.
pub fn encode_rename(old: &Path, new: &Path) -> String {
    format!("{}{}{}", old.display(), RENAME_DELIMITER, new.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> WatchSession {
        WatchSession::with_watch_base(
            "test/testsrc",
            "test/testdes",
            "/home/ws/proj/test/testsrc",
        )
    }

    #[test]
    fn test_translate_nested_file() {
        let pair = translate(&session(), "/home/ws/proj/test/testsrc/dir/test.txt").unwrap();
        assert_eq!(pair.source_path, PathBuf::from("test/testsrc/dir/test.txt"));
        assert_eq!(pair.dest_path, PathBuf::from("test/testdes/dir/test.txt"));
        assert_eq!(pair.relative, PathBuf::from("dir/test.txt"));
    }

    #[test]
    fn test_translate_root_event_yields_roots() {
        let pair = translate(&session(), "/home/ws/proj/test/testsrc").unwrap();
        assert_eq!(pair.source_path, PathBuf::from("test/testsrc"));
        assert_eq!(pair.dest_path, PathBuf::from("test/testdes"));
        assert!(pair.relative.as_os_str().is_empty());
    }

    #[test]
    fn test_translate_rejects_foreign_prefix() {
        let err = translate(&session(), "/elsewhere/dir/test.txt").unwrap_err();
        assert!(
            matches!(err, TranslateError::OutsideWatchBase { .. }),
            "expected OutsideWatchBase, got {err:?}"
        );
    }

    #[test]
    fn test_translate_does_not_match_sibling_with_shared_prefix() {
        // "testsrc2" starts with the same characters as "testsrc" but is not below it.
        let err = translate(&session(), "/home/ws/proj/test/testsrc2/a.txt");
        assert!(err.is_err());
    }

    #[test]
    fn test_translate_rename_is_asymmetric() {
        let paths = translate_rename(
            &session(),
            "/home/ws/proj/test/testsrc/a.txt -> /home/ws/proj/test/testsrc/b.txt",
        )
        .unwrap();
        assert_eq!(paths.old_dest, PathBuf::from("test/testdes/a.txt"));
        assert_eq!(paths.new.source_path, PathBuf::from("test/testsrc/b.txt"));
        assert_eq!(paths.new.dest_path, PathBuf::from("test/testdes/b.txt"));
    }

    #[test]
    fn test_translate_rename_without_delimiter_fails() {
        let err = translate_rename(&session(), "/home/ws/proj/test/testsrc/a.txt").unwrap_err();
        assert!(matches!(err, TranslateError::MissingRenameDelimiter(_)));
    }

    #[test]
    fn test_encode_rename_round_trips_through_translate() {
        let encoded = encode_rename(
            Path::new("/home/ws/proj/test/testsrc/x"),
            Path::new("/home/ws/proj/test/testsrc/sub/x"),
        );
        let paths = translate_rename(&session(), &encoded).unwrap();
        assert_eq!(paths.old_relative, PathBuf::from("x"));
        assert_eq!(paths.new.relative, PathBuf::from("sub/x"));
    }
}
