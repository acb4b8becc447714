//! Filesystem operations that reproduce one source change on the mirror.
//!
//! Every primitive returns a typed [`MirrorError`] and never retries; the
//! caller decides whether a failure ends the dispatch loop. Directory modes
//! looked up while building parent chains are memoized in a [`ModeCache`]
//! that lives for one dispatch (or for the whole initial walk).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, MirrorResult};

/// Permission bits looked up from source directories, keyed by path.
#[derive(Debug, Default)]
pub struct ModeCache {
    modes: HashMap<PathBuf, u32>,
}

impl ModeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode of `path`, stat-ing it only on the first request.
    pub fn mode_of(&mut self, path: &Path) -> MirrorResult<u32> {
        if let Some(mode) = self.modes.get(path) {
            return Ok(*mode);
        }
        let meta = fs::metadata(path).map_err(|e| MirrorError::lookup(path, e))?;
        let mode = permission_bits(&meta);
        self.modes.insert(path.to_path_buf(), mode);
        Ok(mode)
    }
}

#[cfg(unix)]
pub fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
pub fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(mode).create(path)?;
    // DirBuilder is subject to the umask; pin the exact bits afterwards.
    set_mode(path, mode)
}

#[cfg(not(unix))]
fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().create(path)?;
    set_mode(path, mode)
}

/// Give the owner write access to `path`, plus search access for a directory.
/// Returns the permissions it had before.
#[cfg(unix)]
fn grant_owner_write(path: &Path) -> io::Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path)?;
    let saved = meta.permissions();
    let extra = if meta.is_dir() { 0o300 } else { 0o200 };
    fs::set_permissions(path, fs::Permissions::from_mode(saved.mode() | extra))?;
    Ok(saved)
}

#[cfg(not(unix))]
fn grant_owner_write(path: &Path) -> io::Result<fs::Permissions> {
    let saved = fs::metadata(path)?.permissions();
    let mut relaxed = saved.clone();
    relaxed.set_readonly(false);
    fs::set_permissions(path, relaxed)?;
    Ok(saved)
}

/// Run `op`, which writes `path`. If the mirror refuses it, retry once with
/// owner write granted on `path` (when it is an existing file) and on its
/// parent directory.
///
/// The parent gets its mode back afterwards. `path`'s own final mode is set by
/// the caller. Read-only mirrors of read-only sources are only writable this
/// way.
fn retry_with_owner_write<T>(path: &Path, op: impl Fn() -> io::Result<T>) -> io::Result<T> {
    match op() {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {}
        other => return other,
    }
    if path.is_file() {
        grant_owner_write(path)?;
    }
    let parent = parent_or_cwd(path);
    let saved = grant_owner_write(parent)?;
    let result = op();
    fs::set_permissions(parent, saved)?;
    result
}

/// Non-empty prefixes of `path`, leaf first: `a/b/c`, `a/b`, `a`.
fn prefixes_leaf_first(path: &Path) -> Vec<&Path> {
    path.ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn parent_or_cwd(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Replicate the directory structure of `src_dir` at `dst_dir`.
///
/// No-op when `dst_dir` already exists. Otherwise each missing destination
/// segment is created with the mode of the source segment at the same depth
/// counted from the leaf, so roots of different depth still line up. Segments
/// above the shallowest source segment reuse that segment's mode.
pub fn copy_dir_tree(src_dir: &Path, dst_dir: &Path) -> MirrorResult<()> {
    copy_dir_tree_cached(src_dir, dst_dir, &mut ModeCache::new())
}

pub fn copy_dir_tree_cached(
    src_dir: &Path,
    dst_dir: &Path,
    cache: &mut ModeCache,
) -> MirrorResult<()> {
    if dst_dir.exists() {
        return Ok(());
    }

    let src_segments = prefixes_leaf_first(src_dir);
    let dst_segments = prefixes_leaf_first(dst_dir);

    for (depth_from_leaf, segment) in dst_segments.iter().enumerate().rev() {
        if segment.exists() {
            continue;
        }
        let aligned = src_segments
            .get(depth_from_leaf)
            .or_else(|| src_segments.last())
            .copied()
            .unwrap_or(src_dir);
        let mode = cache.mode_of(aligned)?;
        match retry_with_owner_write(segment, || make_dir(segment, mode)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(MirrorError::create(*segment, e)),
        }
    }

    Ok(())
}

/// Copy bytes and mode of `src` to `dst`, building `dst`'s parent chain first.
///
/// An existing `dst` is truncated and overwritten in place. Returns the number
/// of bytes copied.
pub fn copy_file(src: &Path, dst: &Path) -> MirrorResult<u64> {
    copy_file_cached(src, dst, &mut ModeCache::new())
}

pub fn copy_file_cached(src: &Path, dst: &Path, cache: &mut ModeCache) -> MirrorResult<u64> {
    let meta = fs::metadata(src).map_err(|e| MirrorError::lookup(src, e))?;
    if meta.is_dir() {
        return Err(MirrorError::Copy {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "source is a directory"),
        });
    }

    if dst.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
        copy_dir_tree_cached(parent_or_cwd(src), parent_or_cwd(dst), cache)?;
    }

    let mut from = File::open(src).map_err(|e| MirrorError::lookup(src, e))?;
    let open = || {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dst)
    };
    let mut to = retry_with_owner_write(dst, open).map_err(|e| MirrorError::create(dst, e))?;

    let copied = io::copy(&mut from, &mut to).map_err(|e| MirrorError::Copy {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    drop(to);

    set_mode(dst, permission_bits(&meta)).map_err(|e| MirrorError::Permission {
        path: dst.to_path_buf(),
        source: e,
    })?;

    Ok(copied)
}

/// Remove a single entry. Directories must already be empty.
pub fn remove(path: &Path) -> MirrorResult<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| MirrorError::Remove {
        path: path.to_path_buf(),
        source: e,
    })?;
    let result = if meta.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| MirrorError::Remove {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn rename(old: &Path, new: &Path) -> MirrorResult<()> {
    fs::rename(old, new).map_err(|e| MirrorError::Rename {
        from: old.to_path_buf(),
        to: new.to_path_buf(),
        source: e,
    })
}

/// Apply `src`'s permission bits to `dst`. Ownership and timestamps of `dst`
/// are left alone.
pub fn chmod(src: &Path, dst: &Path) -> MirrorResult<()> {
    let meta = fs::metadata(src).map_err(|e| MirrorError::lookup(src, e))?;
    set_mode(dst, permission_bits(&meta)).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            MirrorError::lookup(dst, e)
        } else {
            MirrorError::Permission {
                path: dst.to_path_buf(),
                source: e,
            }
        }
    })
}

/// Entries strictly below `root`, unfiltered, paired with their walk depth.
fn subtree_entries(root: &Path) -> MirrorResult<Vec<(usize, PathBuf, bool)>> {
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut entries = Vec::new();
    for result in walker {
        let entry = result.map_err(|err| MirrorError::Walk {
            root: root.to_path_buf(),
            message: err.to_string(),
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
        entries.push((entry.depth(), entry.into_path(), is_dir));
    }
    Ok(entries)
}

/// Copy everything below `src_dir` into `dst_dir`, directories before the
/// files they contain. Returns the number of bytes copied.
pub fn copy_subtree(src_dir: &Path, dst_dir: &Path, cache: &mut ModeCache) -> MirrorResult<u64> {
    copy_dir_tree_cached(src_dir, dst_dir, cache)?;

    let mut entries = subtree_entries(src_dir)?;
    entries.sort_by_key(|(depth, _, _)| *depth);

    let mut bytes = 0;
    for (_, path, is_dir) in entries {
        let Ok(relative) = path.strip_prefix(src_dir) else {
            continue;
        };
        let target = dst_dir.join(relative);
        if is_dir {
            copy_dir_tree_cached(&path, &target, cache)?;
        } else {
            bytes += copy_file_cached(&path, &target, cache)?;
        }
    }
    Ok(bytes)
}

/// Remove `root` and everything below it, deepest entries first, one
/// single-entry [`remove`] at a time.
pub fn remove_subtree(root: &Path) -> MirrorResult<()> {
    let mut entries = subtree_entries(root)?;
    entries.sort_by_key(|(depth, _, _)| std::cmp::Reverse(*depth));
    for (_, path, _) in entries {
        remove(&path)?;
    }
    remove(root)
}
