use async_trait::async_trait;

use common::{Result, Timeframe};

use crate::series::BarSeries;

/// Abstraction over whatever fetches fresh bars from an exchange.
///
/// Returns up to `limit` most-recent bars, descending by time. The very
/// newest bar is assumed still in progress and is discarded by the store.
/// Rate limiting, authentication and pagination are the implementation's
/// concern.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, pair: &str, timeframe: Timeframe, limit: usize) -> Result<BarSeries>;
}

/// Abstraction over durable bar storage, keyed by symbol.
///
/// `store` must merge-or-replace so a later `load` returns a superset of
/// what was written; when the newest stored bar equals the newest incoming
/// bar the write may be skipped. A failed `store` must leave previously
/// stored data intact. `load` of an unknown key yields an empty series.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn list_keys(&self) -> Result<Vec<String>>;
    async fn load(&self, key: &str) -> Result<BarSeries>;
    async fn store(&self, key: &str, bars: &BarSeries) -> Result<()>;
}
