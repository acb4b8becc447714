//! Event dispatcher: one consumer, one event at a time.
//!
//! Each `handle_*` function takes a single event plus the session and performs
//! at most one logical mirror mutation. [`run_loop`] feeds them strictly in
//! delivery order; a slow copy delays every later event, which keeps the
//! applied mutations totally ordered.

use std::io;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ErrorPolicy, MirrorConfig};
use crate::error::{MirrorError, MirrorResult};
use crate::initializer::initialize;
use crate::replicate::{
    ModeCache, chmod, copy_dir_tree_cached, copy_file_cached, copy_subtree, remove, remove_subtree,
    rename,
};
use crate::session::WatchSession;
use crate::translate::{translate, translate_rename};
use crate::walker::{PathFilter, TreeSnapshot};

use super::event::{FsChangeEvent, FsChangeKind};
use super::{WatchStreams, WatcherHandle, start_watcher};

/// Mirror a newly created file or directory.
pub fn handle_create(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    let pair = translate(session, &event.path)?;
    let mut cache = ModeCache::new();
    if event.is_dir {
        copy_dir_tree_cached(&pair.source_path, &pair.dest_path, &mut cache)
    } else {
        copy_file_cached(&pair.source_path, &pair.dest_path, &mut cache).map(|_| ())
    }
}

/// Re-copy a written file in full. Directory writes carry no content of their own.
pub fn handle_write(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    if event.is_dir {
        return Ok(());
    }
    let pair = translate(session, &event.path)?;
    copy_file_cached(&pair.source_path, &pair.dest_path, &mut ModeCache::new()).map(|_| ())
}

/// Remove the mirrored entry. An already absent entry counts as success.
pub fn handle_remove(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    let pair = translate(session, &event.path)?;
    match remove(&pair.dest_path) {
        Err(MirrorError::Remove { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            debug!("{} already absent", pair.dest_path.display());
            Ok(())
        }
        other => other,
    }
}

/// Copy permission bits from the source entry to its mirror.
pub fn handle_chmod(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    let pair = translate(session, &event.path)?;
    chmod(&pair.source_path, &pair.dest_path)
}

/// Rename the mirrored entry from its old name to its new one.
pub fn handle_rename(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    let paths = translate_rename(session, &event.path)?;
    debug!(
        "rename {} -> {}",
        paths.old_relative.display(),
        paths.new.relative.display()
    );
    rename(&paths.old_dest, &paths.new.dest_path)
}

/// Copy the old mirrored entry to its new location, then remove the old one.
///
/// Directories are copied and removed entry by entry. Not atomic: a crash
/// between the copy and the removal leaves both copies behind.
pub fn handle_move(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    let paths = translate_rename(session, &event.path)?;
    debug!(
        "move {} -> {}",
        paths.old_relative.display(),
        paths.new.relative.display()
    );
    let mut cache = ModeCache::new();

    if paths.old_dest.is_dir() {
        copy_subtree(&paths.old_dest, &paths.new.dest_path, &mut cache)?;
        remove_subtree(&paths.old_dest)
    } else {
        copy_file_cached(&paths.old_dest, &paths.new.dest_path, &mut cache)?;
        remove(&paths.old_dest)
    }
}

/// Route an event to its handler by kind.
pub fn dispatch(session: &WatchSession, event: &FsChangeEvent) -> MirrorResult<()> {
    match event.kind {
        FsChangeKind::Created => handle_create(session, event),
        FsChangeKind::Modified => handle_write(session, event),
        FsChangeKind::Removed => handle_remove(session, event),
        FsChangeKind::PermissionChanged => handle_chmod(session, event),
        FsChangeKind::Renamed => handle_rename(session, event),
        FsChangeKind::Moved => handle_move(session, event),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching(FsChangeKind),
    /// Terminal; no further events are taken.
    Stopped,
}

/// Why the consumption loop ended.
#[derive(Debug)]
pub enum StopReason {
    /// The watch subsystem closed its event stream.
    Closed,
    /// The watch subsystem reported an error.
    WatchError(String),
    /// A handler failed for a kind the error policy treats as fatal.
    HandlerFailed {
        kind: FsChangeKind,
        path: String,
        error: MirrorError,
    },
    /// The blocking worker running a handler panicked or was cancelled.
    Aborted(String),
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Sequential event processor applying the session's error policy.
#[derive(Debug)]
pub struct Dispatcher {
    session: WatchSession,
    policy: ErrorPolicy,
    state: DispatchState,
    handled: u64,
    failed: u64,
}

impl Dispatcher {
    pub fn new(session: WatchSession, policy: ErrorPolicy) -> Self {
        Self {
            session,
            policy,
            state: DispatchState::Idle,
            handled: 0,
            failed: 0,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Events handled successfully so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Handler failures that were reported without stopping.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Handle one event. Returns `Some` when the loop must stop.
    pub fn process(&mut self, event: &FsChangeEvent) -> Option<StopReason> {
        if self.state == DispatchState::Stopped {
            return None;
        }
        self.state = DispatchState::Dispatching(event.kind);

        let result = dispatch(&self.session, event);
        match result {
            Ok(()) => {
                self.handled += 1;
                self.state = DispatchState::Idle;
                None
            }
            Err(err) if self.policy.stops_on(event.kind) => {
                error!("{} failed for {:?}: {err}", event.kind, event.path);
                self.state = DispatchState::Stopped;
                Some(StopReason::HandlerFailed {
                    kind: event.kind,
                    path: event.path.clone(),
                    error: err,
                })
            }
            Err(err) => {
                warn!("{} failed for {:?}: {err}", event.kind, event.path);
                self.failed += 1;
                self.state = DispatchState::Idle;
                None
            }
        }
    }

    /// Enter the terminal state and pass `reason` through.
    fn finish(&mut self, reason: StopReason) -> StopReason {
        self.state = DispatchState::Stopped;
        info!(
            "dispatch loop stopped ({reason:?}) after {} handled events, {} skipped failures",
            self.handled(),
            self.failed()
        );
        reason
    }
}

/// Consume events until the stream closes, the watcher errors, or a fatal
/// handler failure. Handlers run on the blocking pool, one at a time.
pub async fn run_loop(mut dispatcher: Dispatcher, mut streams: WatchStreams) -> StopReason {
    loop {
        tokio::select! {
            biased;
            maybe_event = streams.events.recv() => {
                let Some(event) = maybe_event else {
                    return dispatcher.finish(StopReason::Closed);
                };
                info!("{event}");
                let joined = tokio::task::spawn_blocking(move || {
                    let stop = dispatcher.process(&event);
                    (dispatcher, stop)
                })
                .await;
                match joined {
                    Ok((returned, stop)) => {
                        dispatcher = returned;
                        if let Some(reason) = stop {
                            return dispatcher.finish(reason);
                        }
                    }
                    Err(err) => return StopReason::Aborted(err.to_string()),
                }
            }
            Some(err) = streams.errors.recv() => {
                error!("watch error: {err}");
                return dispatcher.finish(StopReason::WatchError(err.to_string()));
            }
        }
    }
}

/// A running mirror: the OS watch plus the task consuming its events.
pub struct WatchHandle {
    _watcher: WatcherHandle,
    loop_task: JoinHandle<StopReason>,
}

impl WatchHandle {
    /// Wait for the dispatch loop to end.
    pub async fn stopped(&mut self) -> StopReason {
        match (&mut self.loop_task).await {
            Ok(reason) => reason,
            Err(err) => StopReason::Aborted(err.to_string()),
        }
    }
}

fn register(
    session: &WatchSession,
    config: &MirrorConfig,
) -> anyhow::Result<(WatcherHandle, WatchStreams)> {
    let registered = start_watcher(
        session.watch_base(),
        PathFilter::from_config(config),
        Duration::from_millis(config.rename_window_ms),
    )?;
    info!(
        "watching {} -> {}",
        session.source_root().display(),
        session.dest_root().display()
    );
    Ok(registered)
}

fn spawn_loop(
    session: &WatchSession,
    config: &MirrorConfig,
    watcher: WatcherHandle,
    streams: WatchStreams,
) -> WatchHandle {
    let dispatcher = Dispatcher::new(session.clone(), config.error_policy);
    WatchHandle {
        _watcher: watcher,
        loop_task: tokio::spawn(run_loop(dispatcher, streams)),
    }
}

/// Register the recursive watch and spawn the consumption loop.
///
/// Returns as soon as registration succeeds; the loop keeps running in the
/// background until the returned handle is dropped or the loop stops.
pub fn start_watching(
    session: &WatchSession,
    config: &MirrorConfig,
) -> anyhow::Result<WatchHandle> {
    let (watcher, streams) = register(session, config)?;
    Ok(spawn_loop(session, config, watcher, streams))
}

/// Register the watch, run the initial tree sync, then start consuming events.
///
/// Changes made while the initial sync runs are queued by the watcher and
/// replayed afterwards, so nothing between registration and the first
/// dispatched event is missed. If the sync fails the watch is dropped and
/// no event is ever dispatched.
pub async fn start_mirroring(
    session: &WatchSession,
    config: &MirrorConfig,
) -> anyhow::Result<(WatchHandle, TreeSnapshot)> {
    let (watcher, streams) = register(session, config)?;

    let source = session.source_root().to_path_buf();
    let dest = session.dest_root().to_path_buf();
    let filter = PathFilter::from_config(config);
    let snapshot = tokio::task::spawn_blocking(move || initialize(&source, &dest, &filter))
        .await
        .context("initial sync task failed")?
        .context("initial sync failed")?;

    Ok((spawn_loop(session, config, watcher, streams), snapshot))
}
