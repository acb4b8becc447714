use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ErrorPolicy;

/// Mirror a directory tree into another one and keep it in step.
///
/// fsmirror copies everything under SOURCE into DESTINATION, then replays every
/// create, write, remove, rename, chmod and move it observes under SOURCE.
#[derive(Parser, Debug)]
#[command(
    name = "fsmirror",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// A `SOURCE:DESTINATION` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootPair {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Parse `SOURCE:DESTINATION`, splitting on the first colon.
pub fn parse_root_pair(s: &str) -> Result<RootPair, String> {
    let (source, dest) = s
        .split_once(':')
        .ok_or_else(|| format!("expected SOURCE:DESTINATION, got {s:?}"))?;
    if source.is_empty() || dest.is_empty() {
        return Err(format!("both SOURCE and DESTINATION must be non-empty in {s:?}"));
    }
    Ok(RootPair {
        source: PathBuf::from(source),
        dest: PathBuf::from(dest),
    })
}

/// Options that narrow what is mirrored.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Mirror dot-files and dot-directories too.
    #[arg(long)]
    pub include_hidden: bool,

    /// Glob pattern to leave out (repeatable), matched against relative paths and each component.
    #[arg(long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror SOURCE into DESTINATION, then keep mirroring changes until interrupted.
    Watch {
        /// Roots to mirror, e.g. `fsmirror watch -w src:backup`.
        #[arg(
            short = 'w',
            long = "watch",
            value_name = "SOURCE:DESTINATION",
            value_parser = parse_root_pair
        )]
        roots: RootPair,

        #[command(flatten)]
        filters: FilterArgs,

        /// Which handler failures stop mirroring.
        #[arg(long, value_enum)]
        error_policy: Option<ErrorPolicy>,

        /// Start watching without the initial full-tree copy.
        #[arg(long)]
        no_initial_sync: bool,
    },

    /// Copy SOURCE into DESTINATION once and exit.
    Sync {
        #[arg(
            short = 'w',
            long = "watch",
            value_name = "SOURCE:DESTINATION",
            value_parser = parse_root_pair
        )]
        roots: RootPair,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List a directory tree the way the mirror sees it (relative path, kind, size, mode).
    Snapshot {
        /// Directory to walk.
        path: PathBuf,

        #[command(flatten)]
        filters: FilterArgs,

        /// Output as JSON instead of text lines.
        #[arg(long)]
        json: bool,
    },
}
