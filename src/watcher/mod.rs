pub mod dispatch;
pub mod event;

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::translate::encode_rename;
use crate::walker::{PathFilter, walk_tree};
use event::{EntryMeta, FsChangeEvent, FsChangeKind};

/// Handle to a running watcher. Keeps the OS watch alive (dropping stops watching).
pub struct WatcherHandle {
    /// Keep alive: dropping the watcher closes the raw event channel, which
    /// ends the bridge and closes both output channels.
    _watcher: RecommendedWatcher,
    _bridge_task: JoinHandle<()>,
}

/// The two streams the dispatch loop waits on. Both report closure by
/// returning `None` once the watcher is gone.
pub struct WatchStreams {
    pub events: tokio_mpsc::Receiver<FsChangeEvent>,
    pub errors: tokio_mpsc::Receiver<notify::Error>,
}

/// Start a recursive watch on `watch_base` and return classified events.
///
/// `watch_base` must be absolute so every reported path starts with it.
/// Rename halves that are not paired within `rename_window` degrade to a
/// plain removal (old name) or creation (new name).
pub fn start_watcher(
    watch_base: &Path,
    filter: PathFilter,
    rename_window: Duration,
) -> anyhow::Result<(WatcherHandle, WatchStreams)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = std_tx.send(res);
    })?;
    watcher.watch(watch_base, RecursiveMode::Recursive)?;

    let (event_tx, event_rx) = tokio_mpsc::channel::<FsChangeEvent>(256);
    let (error_tx, error_rx) = tokio_mpsc::channel::<notify::Error>(16);

    let mut classifier = EventClassifier::new(watch_base.to_path_buf(), filter);
    let bridge_task = tokio::task::spawn_blocking(move || {
        loop {
            let batch = match std_rx.recv_timeout(rename_window) {
                Ok(Ok(raw)) => classifier.classify(raw),
                Ok(Err(err)) => {
                    if error_tx.blocking_send(err).is_err() {
                        return;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => classifier.flush(),
                Err(RecvTimeoutError::Disconnected) => return,
            };
            for event in batch {
                if event_tx.blocking_send(event).is_err() {
                    return; // receiver dropped, shutdown
                }
            }
        }
    });

    Ok((
        WatcherHandle {
            _watcher: watcher,
            _bridge_task: bridge_task,
        },
        WatchStreams {
            events: event_rx,
            errors: error_rx,
        },
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameHalf {
    From,
    To,
}

#[derive(Debug)]
struct PendingRename {
    half: RenameHalf,
    path: PathBuf,
}

/// Turns raw notify events into [`FsChangeEvent`]s.
///
/// Backends such as inotify report a rename as separate "from" and "to"
/// notifications followed by a combined one. The halves are held back until
/// the combined event consumes them; leftovers are released by [`flush`].
///
/// [`flush`]: EventClassifier::flush
struct EventClassifier {
    base: PathBuf,
    filter: PathFilter,
    pending: Vec<PendingRename>,
}

impl EventClassifier {
    fn new(base: PathBuf, filter: PathFilter) -> Self {
        Self {
            base,
            filter,
            pending: Vec::new(),
        }
    }

    fn is_filtered(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.base) {
            Ok(relative) => self.filter.is_excluded(relative),
            // Paths outside the base are passed on so the translator can reject them.
            Err(_) => false,
        }
    }

    /// Event paths travel as text; a name that is not valid UTF-8 cannot be
    /// translated later, so such events are dropped here with a warning.
    fn text<'p>(&self, kind: FsChangeKind, path: &'p Path) -> Option<&'p str> {
        let text = path.to_str();
        if text.is_none() {
            warn!("skipping {kind} for {}: name is not valid UTF-8", path.display());
        }
        text
    }

    fn simple(&self, kind: FsChangeKind, path: &Path) -> Vec<FsChangeEvent> {
        if self.is_filtered(path) {
            return Vec::new();
        }
        let Some(text) = self.text(kind, path) else {
            return Vec::new();
        };
        let info = match kind {
            FsChangeKind::Removed => None,
            _ => EntryMeta::probe(path),
        };
        let event = FsChangeEvent::new(kind, text, info);
        if kind == FsChangeKind::Created && event.is_dir {
            return self.with_contents(event, path);
        }
        vec![event]
    }

    /// A directory can enter the tree with its contents already inside it
    /// (moved in from outside the watch, or renamed out of an excluded name).
    /// Follow its Created event with one per entry below it, parents first.
    fn with_contents(&self, event: FsChangeEvent, dir: &Path) -> Vec<FsChangeEvent> {
        let mut out = vec![event];
        let snapshot = match walk_tree(dir, &self.filter) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!("not expanding {}: {err}", dir.display());
                return out;
            }
        };
        for (relative, meta) in snapshot.iter() {
            let path = dir.join(relative);
            if self.is_filtered(&path) {
                continue;
            }
            if let Some(text) = self.text(FsChangeKind::Created, &path) {
                out.push(FsChangeEvent::new(FsChangeKind::Created, text, Some(*meta)));
            }
        }
        out
    }

    fn classify(&mut self, raw: Event) -> Vec<FsChangeEvent> {
        debug!("raw event: {:?}", raw);
        let Event { kind, paths, .. } = raw;

        if let EventKind::Modify(ModifyKind::Name(mode)) = kind {
            return self.classify_rename(mode, paths);
        }

        let mapped = match kind {
            EventKind::Create(_) => Some(FsChangeKind::Created),
            EventKind::Remove(_) => Some(FsChangeKind::Removed),
            EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Permissions | MetadataKind::Ownership | MetadataKind::Any,
            )) => Some(FsChangeKind::PermissionChanged),
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(FsChangeKind::Modified),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        };

        let mut out = self.flush();
        if let Some(kind) = mapped {
            out.extend(paths.iter().flat_map(|p| self.simple(kind, p)));
        }
        out
    }

    fn classify_rename(&mut self, mode: RenameMode, paths: Vec<PathBuf>) -> Vec<FsChangeEvent> {
        match mode {
            RenameMode::From | RenameMode::To => {
                let half = if mode == RenameMode::From {
                    RenameHalf::From
                } else {
                    RenameHalf::To
                };
                self.pending
                    .extend(paths.into_iter().map(|path| PendingRename { half, path }));
                Vec::new()
            }
            RenameMode::Both if paths.len() == 2 => {
                let (old, new) = (&paths[0], &paths[1]);
                self.pending.retain(|p| {
                    let consumed = (p.half == RenameHalf::From && &p.path == old)
                        || (p.half == RenameHalf::To && &p.path == new);
                    !consumed
                });
                let mut out = self.flush();
                out.extend(self.paired(old, new));
                out
            }
            _ => {
                // Direction unknown: decide by whether the path still exists.
                let mut out = self.flush();
                for path in &paths {
                    let kind = if path.exists() {
                        FsChangeKind::Created
                    } else {
                        FsChangeKind::Removed
                    };
                    out.extend(self.simple(kind, path));
                }
                out
            }
        }
    }

    fn paired(&self, old: &Path, new: &Path) -> Vec<FsChangeEvent> {
        match (self.is_filtered(old), self.is_filtered(new)) {
            (true, true) => Vec::new(),
            (true, false) => self.simple(FsChangeKind::Created, new),
            (false, true) => self.simple(FsChangeKind::Removed, old),
            (false, false) => {
                let kind = if old.parent() == new.parent() {
                    FsChangeKind::Renamed
                } else {
                    FsChangeKind::Moved
                };
                if self.text(kind, old).is_none() || self.text(kind, new).is_none() {
                    return Vec::new();
                }
                vec![FsChangeEvent::new(
                    kind,
                    encode_rename(old, new),
                    EntryMeta::probe(new),
                )]
            }
        }
    }

    /// Release unpaired rename halves: a lone "from" left the tree, a lone
    /// "to" entered it.
    fn flush(&mut self) -> Vec<FsChangeEvent> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .flat_map(|p| match p.half {
                RenameHalf::From => self.simple(FsChangeKind::Removed, &p.path),
                RenameHalf::To => self.simple(FsChangeKind::Created, &p.path),
            })
            .collect()
    }
}
