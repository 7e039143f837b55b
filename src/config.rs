//! Configuration file support for herd
//!
//! Config files are loaded in order (later overrides earlier):
//! 1. `~/.config/herd/config.toml` (user defaults)
//! 2. `.herd.toml` in the data root (workspace overrides)
//!
//! CLI flags override all config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration options loaded from config files
///
/// # Example
///
/// ```toml
/// # ~/.config/herd/config.toml or <data root>/.herd.toml
/// data_root = "/srv/archive"   # Where the datasets live
/// lock_ttl_secs = 300          # Heartbeats older than this are reclaimable
/// heartbeat_secs = 60          # How often long operations refresh their lock
/// threads = 4                  # Default batch concurrency
/// quiet = false                # Suppress progress output
/// verbose = false              # Enable verbose logging
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data root holding the dataset directories (overridden by --root)
    pub data_root: Option<PathBuf>,
    /// Staleness TTL for lock reclamation, in seconds
    pub lock_ttl_secs: Option<u64>,
    /// Heartbeat interval for long-running lock holders, in seconds
    pub heartbeat_secs: Option<u64>,
    /// Default batch concurrency (overridden by --threads)
    pub threads: Option<usize>,
    /// Enable quiet mode by default
    pub quiet: Option<bool>,
    /// Enable verbose mode by default
    pub verbose: Option<bool>,
}

impl Config {
    /// Load configuration from the user config file and the data root
    pub fn load(data_root: &Path) -> Self {
        let user_config = dirs::config_dir()
            .map(|d| d.join("herd/config.toml"))
            .and_then(|p| Self::load_file(&p))
            .unwrap_or_default();

        let workspace_config = Self::load_file(&data_root.join(".herd.toml")).unwrap_or_default();

        let merged = user_config.override_with(workspace_config);
        tracing::debug!(
            data_root = ?merged.data_root,
            lock_ttl_secs = ?merged.lock_ttl_secs,
            heartbeat_secs = ?merged.heartbeat_secs,
            threads = ?merged.threads,
            quiet = ?merged.quiet,
            verbose = ?merged.verbose,
            "Effective config after merge"
        );
        merged
    }

    /// Load configuration from a specific file
    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Layer another config on top (other overrides self where present)
    fn override_with(self, other: Self) -> Self {
        Config {
            data_root: other.data_root.or(self.data_root),
            lock_ttl_secs: other.lock_ttl_secs.or(self.lock_ttl_secs),
            heartbeat_secs: other.heartbeat_secs.or(self.heartbeat_secs),
            threads: other.threads.or(self.threads),
            quiet: other.quiet.or(self.quiet),
            verbose: other.verbose.or(self.verbose),
        }
    }

    // ===== Accessors with defaults =====

    /// Default lock staleness TTL, matching `LockRegistry::DEFAULT_TTL`
    pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;
    /// Default heartbeat interval for long-running operations
    pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.unwrap_or(Self::DEFAULT_LOCK_TTL_SECS))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.unwrap_or(Self::DEFAULT_HEARTBEAT_SECS))
    }

    /// Batch concurrency with default fallback (sequential)
    pub fn threads_or_default(&self) -> usize {
        self.threads.unwrap_or(1).max(1)
    }

    pub fn quiet_or_default(&self) -> bool {
        self.quiet.unwrap_or(false)
    }

    pub fn verbose_or_default(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}
