// src/config.rs
//! Cache configuration.
//!
//! Grounded on the teacher's `federation/config.rs`: a `serde` struct with
//! per-field `#[serde(default = "...")]` functions, a hand-written
//! `Default` impl, and TOML round-trip tests.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Recognized configuration options (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Absolute Hot tier root; required.
    pub cache_directory: PathBuf,

    /// Absolute Cold tier root; required when `use_cold_storage`.
    #[serde(default)]
    pub cold_storage_directory: Option<PathBuf>,

    /// Enables the two-tier model.
    #[serde(default)]
    pub use_cold_storage: bool,

    /// Upstream peer base URI. `None` means this node is authoritative.
    #[serde(default)]
    pub distribution_file_server_address: Option<String>,

    /// Whether this node serves peer-pull requests (informational to the core).
    #[serde(default)]
    pub is_distribution_node: bool,

    /// Pin outbound peer requests to HTTP/2 exact-version.
    #[serde(default)]
    pub distribution_file_server_force_http2: bool,

    /// Hot retention by last-access, in days.
    #[serde(default = "default_hot_retention_days")]
    pub unused_file_retention_period_in_days: i64,

    /// Hot forced eviction by last-write, in hours. `None` disables.
    #[serde(default)]
    pub forced_deletion_of_files_after_hours: Option<i64>,

    /// Hot size cap in GiB. `<= 0` (or `None`) disables.
    #[serde(default)]
    pub cache_size_hard_limit_in_gi_b: Option<f64>,

    /// Cold retention by last-access, in days.
    #[serde(default = "default_cold_retention_days")]
    pub cold_storage_unused_file_retention_period_in_days: i64,

    /// Cold size cap in GiB. `<= 0` (or `None`) disables.
    #[serde(default)]
    pub cold_storage_size_hard_limit_in_gi_b: Option<f64>,

    /// Janitor cadence, in minutes.
    #[serde(default = "default_cleanup_check_minutes")]
    pub cleanup_check_in_minutes: u32,
}

fn default_hot_retention_days() -> i64 {
    14
}

fn default_cold_retention_days() -> i64 {
    60
}

fn default_cleanup_check_minutes() -> u32 {
    15
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: PathBuf::from("/var/lib/cache-distd/hot"),
            cold_storage_directory: None,
            use_cold_storage: false,
            distribution_file_server_address: None,
            is_distribution_node: false,
            distribution_file_server_force_http2: false,
            unused_file_retention_period_in_days: default_hot_retention_days(),
            forced_deletion_of_files_after_hours: None,
            cache_size_hard_limit_in_gi_b: None,
            cold_storage_unused_file_retention_period_in_days: default_cold_retention_days(),
            cold_storage_size_hard_limit_in_gi_b: None,
            cleanup_check_in_minutes: default_cleanup_check_minutes(),
        }
    }
}

fn gib_to_bytes(gib: Option<f64>) -> i64 {
    match gib {
        Some(v) if v > 0.0 => (v * 1024.0 * 1024.0 * 1024.0) as i64,
        _ => 0,
    }
}

impl CacheConfig {
    /// Loads configuration from a TOML file on disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("parsing config: {e}")))
    }

    pub fn hot_size_cap_bytes(&self) -> i64 {
        gib_to_bytes(self.cache_size_hard_limit_in_gi_b)
    }

    pub fn cold_size_cap_bytes(&self) -> i64 {
        gib_to_bytes(self.cold_storage_size_hard_limit_in_gi_b)
    }

    pub fn cold_enabled(&self) -> bool {
        self.use_cold_storage && self.cold_storage_directory.is_some()
    }

    pub fn peer_configured(&self) -> bool {
        self.distribution_file_server_address.is_some()
    }
}
