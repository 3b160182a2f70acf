//! Daemon configuration: TOML file with serde defaults, CLI overrides
//! applied by the binary.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{CddError, Result};
use crate::model::DependsKeyColumn;

/// Tunable intervals and identity of one daemon instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Application identity this daemon runs as. One live instance per name.
    pub app_name: String,
    /// Dependency-table key column strategy, fixed at startup.
    pub key_column: DependsKeyColumn,
    /// Sleep between polls when the notification queue is empty.
    pub poll_interval_ms: u64,
    /// Safety-net full cache refresh cadence.
    pub cache_refresh_secs: u64,
    /// TSID cache entries older than this are re-fetched on access.
    pub tsid_ttl_secs: u64,
    /// Lock heartbeats older than this mark the holder as crashed.
    pub lock_staleness_secs: u64,
    /// Dump group expansions into this directory after each evaluation.
    pub group_dump_dir: Option<PathBuf>,
    /// Run one full evaluation before entering the poll loop.
    pub full_eval_on_startup: bool,
    /// Run the startup full evaluation, then exit.
    pub full_eval_only: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("cdd.db"),
            app_name: "compdepends".to_string(),
            key_column: DependsKeyColumn::TsId,
            poll_interval_ms: 1_000,
            cache_refresh_secs: 900,
            tsid_ttl_secs: 2_700,
            lock_staleness_secs: 20,
            group_dump_dir: None,
            full_eval_on_startup: false,
            full_eval_only: false,
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CddError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| CddError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(CddError::InvalidConfig {
                details: "app_name must not be empty".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(CddError::InvalidConfig {
                details: "poll_interval_ms must be positive".to_string(),
            });
        }
        if self.lock_staleness_secs == 0 {
            return Err(CddError::InvalidConfig {
                details: "lock_staleness_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn cache_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cache_refresh_secs)
    }

    #[must_use]
    pub const fn tsid_ttl(&self) -> Duration {
        Duration::from_secs(self.tsid_ttl_secs)
    }

    #[must_use]
    pub const fn lock_staleness(&self) -> Duration {
        Duration::from_secs(self.lock_staleness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::DaemonConfig;

    #[test]
    fn defaults_match_documented_cadences() {
        let config = DaemonConfig::default();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.cache_refresh_secs, 900);
        assert_eq!(config.tsid_ttl_secs, 2_700);
        assert_eq!(config.lock_staleness_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: DaemonConfig =
            toml::from_str("app_name = \"hydro-deps\"\ndb_path = \"/var/lib/cdd/hydro.db\"")
                .unwrap();
        assert_eq!(config.app_name, "hydro-deps");
        assert_eq!(config.cache_refresh_secs, 900);
    }

    #[test]
    fn empty_app_name_is_rejected() {
        let config = DaemonConfig {
            app_name: "  ".to_string(),
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_key_column() {
        let config = DaemonConfig {
            key_column: crate::model::DependsKeyColumn::SiteDatatypeId,
            ..DaemonConfig::default()
        };
        let raw = toml::to_string(&config).unwrap();
        let back: DaemonConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.key_column, config.key_column);
    }
}
