use std::path::Path;

use tracing::{debug, info};

use crate::error::MirrorResult;
use crate::replicate::{ModeCache, copy_dir_tree_cached, copy_file_cached};
use crate::walker::{PathFilter, TreeSnapshot, walk_tree};

/// Mirror everything currently under `source_root` into `dest_root`.
///
/// Every entry builds its own destination parent chain before it is copied,
/// so the order in which the snapshot is replayed does not matter. The first
/// failure aborts the whole pass; the caller must not start watching after an
/// error here.
pub fn initialize(
    source_root: &Path,
    dest_root: &Path,
    filter: &PathFilter,
) -> MirrorResult<TreeSnapshot> {
    let snapshot = walk_tree(source_root, filter)?;
    let mut cache = ModeCache::new();

    copy_dir_tree_cached(source_root, dest_root, &mut cache)?;

    let mut bytes = 0u64;
    for (relative, meta) in snapshot.iter() {
        let src = source_root.join(relative);
        let dst = dest_root.join(relative);
        if meta.is_dir {
            copy_dir_tree_cached(&src, &dst, &mut cache)?;
        } else {
            bytes += copy_file_cached(&src, &dst, &mut cache)?;
            debug!("{} has been copied to {}", src.display(), dst.display());
        }
    }

    info!(
        "initialized {} from {}: {} directories, {} files, {} bytes",
        dest_root.display(),
        source_root.display(),
        snapshot.dir_count(),
        snapshot.file_count(),
        bytes
    );

    Ok(snapshot)
}
