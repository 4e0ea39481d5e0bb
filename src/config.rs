//! Configuration via environment variables.
//!
//! All variables use the `AQUEDUCT_` prefix:
//! - `AQUEDUCT_DATABASE_URL`: PostgreSQL connection string (required for the
//!   postgres-backed store)
//! - `AQUEDUCT_ORG_ID`: organization whose workflows this server owns
//! - `AQUEDUCT_STORAGE_DIR`: root for file-backed operator storage
//!   (default: `~/.aqueduct/storage/operators`)
//! - `AQUEDUCT_BIN_DIR`: directory holding operator executor binaries
//!   (default: `~/.aqueduct/bin`)
//! - `AQUEDUCT_PYTHON`: python executable used for operator jobs
//!   (default: `python3`)
//! - `AQUEDUCT_POLL_INTERVAL_MS`: engine poll interval (default: 300)
//! - `AQUEDUCT_EXEC_TIMEOUT_SECS`: per-run execution deadline
//!   (default: 28800, i.e. 8 hours)
//! - `AQUEDUCT_CLEANUP_TIMEOUT_SECS`: drain deadline when a run is torn
//!   down early (default: 120)
//! - `AQUEDUCT_SYNC_INTERVAL_SECS`: interval between reconciliation passes
//!   for externally scheduled DAGs (default: 60)

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::EngineTimeouts;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Organization whose workflows this server owns
    pub org_id: String,

    /// Root directory for file-backed artifact storage
    pub storage_dir: PathBuf,

    /// Directory holding operator executor binaries
    pub bin_dir: PathBuf,

    /// Python executable used for operator jobs
    pub python_executable: String,

    /// Engine poll interval
    pub poll_interval: Duration,

    /// Per-run execution deadline
    pub execution_timeout: Duration,

    /// Drain deadline when a run is torn down early
    pub cleanup_timeout: Duration,

    /// Interval between reconciliation passes for externally scheduled DAGs
    pub sync_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` file if present, then reads from environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key-value source. Tests inject a map here instead of
    /// mutating the process environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("AQUEDUCT_DATABASE_URL")
            .context("AQUEDUCT_DATABASE_URL environment variable is required")?;

        let org_id = lookup("AQUEDUCT_ORG_ID").unwrap_or_else(|| "default".to_string());

        let home = lookup("HOME").context("HOME environment variable is required")?;
        let storage_dir = lookup("AQUEDUCT_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(&home)
                    .join(".aqueduct")
                    .join("storage")
                    .join("operators")
            });
        let bin_dir = lookup("AQUEDUCT_BIN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&home).join(".aqueduct").join("bin"));

        let python_executable =
            lookup("AQUEDUCT_PYTHON").unwrap_or_else(|| "python3".to_string());

        let poll_interval_ms: u64 = lookup("AQUEDUCT_POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(300);

        let execution_timeout_secs: u64 = lookup("AQUEDUCT_EXEC_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(8 * 60 * 60);

        let cleanup_timeout_secs: u64 = lookup("AQUEDUCT_CLEANUP_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);

        let sync_interval_secs: u64 = lookup("AQUEDUCT_SYNC_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            database_url,
            org_id,
            storage_dir,
            bin_dir,
            python_executable,
            poll_interval: Duration::from_millis(poll_interval_ms),
            execution_timeout: Duration::from_secs(execution_timeout_secs),
            cleanup_timeout: Duration::from_secs(cleanup_timeout_secs),
            sync_interval: Duration::from_secs(sync_interval_secs),
        })
    }

    /// Get the global configuration, loading it on first access.
    pub fn global() -> Result<&'static Config> {
        if let Some(config) = CONFIG.get() {
            return Ok(config);
        }
        let config = Self::from_env()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    /// Engine timeouts derived from this configuration.
    pub fn engine_timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            exec_timeout: self.execution_timeout,
            cleanup_timeout: self.cleanup_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup_from(&[
            ("AQUEDUCT_DATABASE_URL", "postgres://localhost/aqueduct"),
            ("HOME", "/home/aq"),
        ]))
        .unwrap();
        assert_eq!(config.org_id, "default");
        assert_eq!(config.python_executable, "python3");
        assert_eq!(config.poll_interval, Duration::from_millis(300));
        assert_eq!(config.execution_timeout, Duration::from_secs(8 * 60 * 60));
        assert_eq!(config.cleanup_timeout, Duration::from_secs(120));
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(
            config.storage_dir,
            PathBuf::from("/home/aq/.aqueduct/storage/operators")
        );
        assert_eq!(config.bin_dir, PathBuf::from("/home/aq/.aqueduct/bin"));
    }

    #[test]
    fn overrides_take_precedence() {
        let config = Config::from_lookup(lookup_from(&[
            ("AQUEDUCT_DATABASE_URL", "postgres://localhost/aqueduct"),
            ("HOME", "/home/aq"),
            ("AQUEDUCT_ORG_ID", "acme"),
            ("AQUEDUCT_POLL_INTERVAL_MS", "50"),
            ("AQUEDUCT_EXEC_TIMEOUT_SECS", "900"),
            ("AQUEDUCT_STORAGE_DIR", "/data/blobs"),
        ]))
        .unwrap();
        assert_eq!(config.org_id, "acme");
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.execution_timeout, Duration::from_secs(900));
        assert_eq!(config.storage_dir, PathBuf::from("/data/blobs"));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("HOME", "/home/aq")])).unwrap_err();
        assert!(err.to_string().contains("AQUEDUCT_DATABASE_URL"));
    }
}
