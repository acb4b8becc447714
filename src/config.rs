use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;
use tracing::warn;

use crate::watcher::event::FsChangeKind;

/// Config file basename looked up in the source root.
pub const CONFIG_FILE: &str = "fsmirror.toml";

/// Default wait for the second half of a split rename notification.
pub const DEFAULT_RENAME_WINDOW_MS: u64 = 50;

/// Which handler failures stop the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Create, write, rename and move failures stop the loop; remove and chmod
    /// failures are reported and skipped.
    #[default]
    Legacy,
    /// Report every failure and keep going.
    Continue,
    /// Stop on the first failure of any kind.
    Halt,
}

impl ErrorPolicy {
    /// Whether a failed handler for `kind` ends the loop.
    pub fn stops_on(self, kind: FsChangeKind) -> bool {
        match self {
            Self::Continue => false,
            Self::Halt => true,
            Self::Legacy => !matches!(
                kind,
                FsChangeKind::Removed | FsChangeKind::PermissionChanged
            ),
        }
    }
}

/// Configuration loaded from `fsmirror.toml` in the source root.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Skip dot-files and dot-directories, initially and while watching.
    pub ignore_hidden: bool,
    /// Additional glob patterns excluded from mirroring.
    pub exclude: Option<Vec<String>>,
    pub error_policy: ErrorPolicy,
    pub rename_window_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            ignore_hidden: true,
            exclude: None,
            error_policy: ErrorPolicy::default(),
            rename_window_ms: DEFAULT_RENAME_WINDOW_MS,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from `fsmirror.toml` in the given root directory.
    ///
    /// Returns the defaults if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!("failed to parse {}: {err}. Using defaults.", config_path.display());
                    Self::default()
                }
            },
            Err(err) => {
                warn!("failed to read {}: {err}. Using defaults.", config_path.display());
                Self::default()
            }
        }
    }

    /// Fold command-line overrides into the file configuration.
    pub fn with_overrides(
        mut self,
        include_hidden: bool,
        exclude: &[String],
        error_policy: Option<ErrorPolicy>,
    ) -> Self {
        if include_hidden {
            self.ignore_hidden = false;
        }
        if !exclude.is_empty() {
            self.exclude
                .get_or_insert_with(Vec::new)
                .extend(exclude.iter().cloned());
        }
        if let Some(policy) = error_policy {
            self.error_policy = policy;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MirrorConfig::load(dir.path());
        assert!(config.ignore_hidden);
        assert!(config.exclude.is_none());
        assert_eq!(config.error_policy, ErrorPolicy::Legacy);
        assert_eq!(config.rename_window_ms, DEFAULT_RENAME_WINDOW_MS);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "exclude = [\"*.tmp\"]\nerror_policy = \"continue\"\n",
        )
        .unwrap();
        let config = MirrorConfig::load(dir.path());
        assert_eq!(config.exclude, Some(vec!["*.tmp".to_string()]));
        assert_eq!(config.error_policy, ErrorPolicy::Continue);
        assert!(config.ignore_hidden, "unspecified keys keep defaults");
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "ignore_hidden = \"yes please\"").unwrap();
        let config = MirrorConfig::load(dir.path());
        assert!(config.ignore_hidden);
    }

    #[test]
    fn test_overrides() {
        let config = MirrorConfig::default().with_overrides(
            true,
            &["build".to_string()],
            Some(ErrorPolicy::Halt),
        );
        assert!(!config.ignore_hidden);
        assert_eq!(config.exclude, Some(vec!["build".to_string()]));
        assert_eq!(config.error_policy, ErrorPolicy::Halt);
    }

    #[test]
    fn test_legacy_policy_is_asymmetric() {
        let policy = ErrorPolicy::Legacy;
        assert!(policy.stops_on(FsChangeKind::Created));
        assert!(policy.stops_on(FsChangeKind::Modified));
        assert!(policy.stops_on(FsChangeKind::Renamed));
        assert!(policy.stops_on(FsChangeKind::Moved));
        assert!(!policy.stops_on(FsChangeKind::Removed));
        assert!(!policy.stops_on(FsChangeKind::PermissionChanged));
    }
}
