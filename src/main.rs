mod cli;
mod config;
mod error;
mod initializer;
mod output;
mod replicate;
mod session;
mod translate;
mod walker;
mod watcher;

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, FilterArgs, RootPair};
use config::{ErrorPolicy, MirrorConfig};
use output::SyncSummary;
use session::{WatchSession, normalize};
use walker::{PathFilter, walk_tree};
use watcher::dispatch::{start_mirroring, start_watching};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Build the session and effective config, refusing roots that nest.
fn prepare(
    roots: &RootPair,
    filters: &FilterArgs,
    error_policy: Option<ErrorPolicy>,
) -> Result<(WatchSession, MirrorConfig)> {
    let session = WatchSession::new(&roots.source, &roots.dest)
        .context("cannot resolve the working directory")?;

    let cwd = std::env::current_dir()?;
    let source_abs = normalize(&cwd.join(session.source_root()));
    let dest_abs = normalize(&cwd.join(session.dest_root()));
    if dest_abs.starts_with(&source_abs) || source_abs.starts_with(&dest_abs) {
        bail!(
            "source {} and destination {} must not contain one another",
            roots.source.display(),
            roots.dest.display()
        );
    }
    if !session.source_root().is_dir() {
        bail!("source {} is not a directory", roots.source.display());
    }

    let config = MirrorConfig::load(session.source_root()).with_overrides(
        filters.include_hidden,
        &filters.exclude,
        error_policy,
    );
    Ok((session, config))
}

async fn run_watch(session: WatchSession, config: MirrorConfig, initial_sync: bool) -> Result<()> {
    let mut handle = if initial_sync {
        let (handle, snapshot) = start_mirroring(&session, &config).await?;
        output::print_watched(&snapshot);
        handle
    } else {
        start_watching(&session, &config)?
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for Ctrl-C")?;
            info!("got interrupt, exiting");
            Ok(())
        }
        reason = handle.stopped() => {
            if reason.is_failure() {
                bail!("mirroring stopped: {reason:?}");
            }
            info!("watch closed");
            Ok(())
        }
    }
}

fn run_sync(session: &WatchSession, config: &MirrorConfig, json: bool) -> Result<()> {
    let start = Instant::now();
    let snapshot = initializer::initialize(
        session.source_root(),
        session.dest_root(),
        &PathFilter::from_config(config),
    )
    .with_context(|| format!("initial sync of {} failed", session.source_root().display()))?;

    let summary = SyncSummary::new(
        session.source_root().to_path_buf(),
        session.dest_root().to_path_buf(),
        &snapshot,
        start.elapsed().as_secs_f64(),
    );
    output::print_sync_summary(&summary, json);
    Ok(())
}

fn run_snapshot(path: &Path, filters: &FilterArgs, json: bool) -> Result<()> {
    let config =
        MirrorConfig::load(path).with_overrides(filters.include_hidden, &filters.exclude, None);
    let snapshot = walk_tree(path, &PathFilter::from_config(&config))?;
    output::print_snapshot(&snapshot, json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Watch {
            roots,
            filters,
            error_policy,
            no_initial_sync,
        } => {
            let (session, config) = prepare(&roots, &filters, error_policy)?;
            run_watch(session, config, !no_initial_sync).await?;
        }
        Commands::Sync {
            roots,
            filters,
            json,
        } => {
            let (session, config) = prepare(&roots, &filters, None)?;
            tokio::task::spawn_blocking(move || run_sync(&session, &config, json)).await??;
        }
        Commands::Snapshot {
            path,
            filters,
            json,
        } => {
            run_snapshot(&path, &filters, json)?;
        }
    }

    Ok(())
}
