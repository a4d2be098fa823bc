use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use common::{Error, Result};

use crate::ports::Persistence;
use crate::series::BarSeries;

/// File-backed persistence: one `<key>.json` per symbol key under a data
/// directory, each file a JSON array of bars descending by time.
///
/// Writes go through a temp file and an atomic rename, so a failed write
/// never clobbers what was stored before.
pub struct JsonFiles {
    dir: PathBuf,
}

impl JsonFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // keys may carry pair separators ("BTC/USDT1h"); keep them out of
        // the filesystem path
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '-' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read_series(path: &Path) -> Result<BarSeries> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(serde_json::from_slice::<BarSeries>(&data)?.sort()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BarSeries::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Persistence for JsonFiles {
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn load(&self, key: &str) -> Result<BarSeries> {
        Self::read_series(&self.path_for(key)).await
    }

    async fn store(&self, key: &str, bars: &BarSeries) -> Result<()> {
        if bars.is_empty() {
            return Ok(());
        }
        let path = self.path_for(key);
        let existing = Self::read_series(&path).await?;

        // nothing new since the last write
        if !existing.is_empty() && existing.last_bar() == bars.last_bar() {
            return Ok(());
        }

        let merged = BarSeries::merge(existing, bars.clone());
        let data = serde_json::to_vec(&merged)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Persistence(format!("rename {}: {e}", path.display())))?;

        debug!(key = %key, bars = merged.len(), "series persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_bars::series;

    #[tokio::test]
    async fn load_of_missing_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = JsonFiles::new(dir.path());
        assert!(files.load("NOPE1h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let files = JsonFiles::new(dir.path());
        let bars = series(&[3, 2, 1]).sort();
        files.store("BTCUSDT1h", &bars).await.unwrap();
        assert_eq!(files.load("BTCUSDT1h").await.unwrap(), bars);
        assert_eq!(files.list_keys().await.unwrap(), vec!["BTCUSDT1h"]);
    }

    #[tokio::test]
    async fn store_merges_to_a_superset() {
        let dir = tempfile::tempdir().unwrap();
        let files = JsonFiles::new(dir.path());
        files.store("K1h", &series(&[3, 2]).sort()).await.unwrap();
        files.store("K1h", &series(&[5, 4, 3]).sort()).await.unwrap();
        let loaded = files.load("K1h").await.unwrap();
        let times: Vec<i64> = loaded.iter().map(|b| b.time.timestamp() / 60).collect();
        assert_eq!(times, vec![5, 4, 3, 2]);
    }

    #[tokio::test]
    async fn slashes_in_keys_stay_out_of_paths() {
        let dir = tempfile::tempdir().unwrap();
        let files = JsonFiles::new(dir.path());
        files.store("BTC/USDT1h", &series(&[2, 1]).sort()).await.unwrap();
        assert_eq!(files.load("BTC/USDT1h").await.unwrap().len(), 2);
    }
}
