use std::path::PathBuf;

use serde::Serialize;

use crate::walker::{TreeSnapshot, slash_key};

/// Result of a one-shot `sync` run.
#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
    /// Wall-clock time for the sync in seconds.
    pub elapsed_secs: f64,
}

impl SyncSummary {
    pub fn new(
        source: PathBuf,
        dest: PathBuf,
        snapshot: &TreeSnapshot,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            source,
            dest,
            directories: snapshot.dir_count(),
            files: snapshot.file_count(),
            bytes: snapshot.total_bytes(),
            elapsed_secs,
        }
    }
}

/// Print a summary of the sync run.
///
/// - `json = true`: emit a pretty-printed JSON object to stdout.
/// - `json = false`: emit a short human-readable summary to stdout.
pub fn print_sync_summary(summary: &SyncSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising summary: {}", e),
        }
        return;
    }

    println!(
        "Mirrored {} into {} in {:.2}s",
        summary.source.display(),
        summary.dest.display(),
        summary.elapsed_secs
    );
    println!(
        "  {} directories, {} files, {} bytes",
        summary.directories, summary.files, summary.bytes
    );
}

#[derive(Serialize)]
struct SnapshotRow {
    path: String,
    kind: &'static str,
    size: u64,
    mode: String,
}

/// Print every snapshot entry, one per line or as a JSON array.
pub fn print_snapshot(snapshot: &TreeSnapshot, json: bool) {
    let rows: Vec<SnapshotRow> = snapshot
        .iter()
        .map(|(path, meta)| SnapshotRow {
            path: slash_key(path),
            kind: if meta.is_dir { "dir" } else { "file" },
            size: meta.len,
            mode: format!("{:04o}", meta.mode),
        })
        .collect();

    if json {
        match serde_json::to_string_pretty(&rows) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serialising snapshot: {}", e),
        }
        return;
    }

    for row in rows {
        println!("{} {:>4} {:>10} {}", row.mode, row.kind, row.size, row.path);
    }
}

/// Print the entries now under watch as `<relative>: <name>` lines.
pub fn print_watched(snapshot: &TreeSnapshot) {
    for (path, _) in snapshot.iter() {
        let name = path.file_name().unwrap_or(path.as_os_str());
        println!("{}: {}", slash_key(path), name.to_string_lossy());
    }
    println!();
}
