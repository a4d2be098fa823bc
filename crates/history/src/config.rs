use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Store tunables. Everything the refresh loop and the persistence adapter
/// need, carried explicitly instead of process-wide globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Hard cap on bars requested in a single downloader call.
    pub max_limit: usize,
    /// Directory the file-backed persistence adapter writes under.
    pub data_dir: PathBuf,
    /// Downloader attempts per symbol per refresh cycle.
    pub max_tries: u32,
    /// Pause between downloader retries, seconds.
    pub retry_delay_secs: u64,
    /// Pause between refresh cycles, seconds.
    pub update_interval_secs: u64,
    /// Capacity of the new-data notification channel. Token loss past this
    /// is accepted — subscribers re-read the store by key.
    pub notify_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_limit: 1_000,
            data_dir: PathBuf::from("data"),
            max_tries: 5,
            retry_delay_secs: 2,
            update_interval_secs: 1,
            notify_capacity: 1_024,
        }
    }
}

impl StoreConfig {
    /// Load from a TOML file; unset keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.max_limit, 1_000);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert!(cfg.max_tries > 0);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: StoreConfig = toml::from_str("max_limit = 50\n").unwrap();
        assert_eq!(cfg.max_limit, 50);
        assert_eq!(cfg.max_tries, StoreConfig::default().max_tries);
    }
}
