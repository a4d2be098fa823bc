use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use common::{split_symbol, Error, Result};

use crate::config::StoreConfig;
use crate::ports::{Downloader, Persistence};
use crate::series::BarSeries;

/// Keyed collection of bar series with live refresh.
///
/// The store exclusively owns every series it holds; readers get snapshot
/// clones. A broadcast channel carries the key of each just-updated series —
/// sends never block and tokens may be lost on lag, which is fine because
/// subscribers re-read the store by key.
///
/// `Store` is a cheap handle (all state behind `Arc`): clone it freely into
/// background tasks.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
    notify: broadcast::Sender<String>,
    downloader: Arc<dyn Downloader>,
    persistence: Arc<dyn Persistence>,
    config: StoreConfig,
    max_limit: Arc<AtomicUsize>,
}

struct Inner {
    bars: HashMap<String, BarSeries>,
    update: bool,
}

impl Store {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        persistence: Arc<dyn Persistence>,
        config: StoreConfig,
    ) -> Store {
        let (notify, _) = broadcast::channel(config.notify_capacity.max(1));
        Store {
            inner: Arc::new(RwLock::new(Inner {
                bars: HashMap::new(),
                update: false,
            })),
            notify,
            max_limit: Arc::new(AtomicUsize::new(config.max_limit)),
            downloader,
            persistence,
            config,
        }
    }

    /// Receiver of just-updated symbol keys. Receivers that fall behind lose
    /// the oldest tokens.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notify.subscribe()
    }

    /// Snapshot of one key's series; empty when the key is unknown.
    pub async fn get_bars(&self, symbol: &str) -> BarSeries {
        self.inner
            .read()
            .await
            .bars
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every key and series.
    pub async fn all(&self) -> HashMap<String, BarSeries> {
        self.inner.read().await.bars.clone()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().await.bars.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Smallest bar period across all series; one minute when empty.
    pub async fn min_period(&self) -> Duration {
        let inner = self.inner.read().await;
        inner
            .bars
            .values()
            .map(BarSeries::period)
            .min()
            .unwrap_or_else(|| Duration::minutes(1))
    }

    /// Earliest bar time across all series.
    pub async fn first_time(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .bars
            .values()
            .filter_map(|b| b.first_bar().map(|bar| bar.time))
            .min()
    }

    /// Latest bar time across all series.
    pub async fn last_time(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .bars
            .values()
            .filter_map(|b| b.last_bar().map(|bar| bar.time))
            .max()
    }

    /// Truncate every series to its newest `n` bars.
    pub async fn limit(&self, n: usize) {
        let mut inner = self.inner.write().await;
        for bars in inner.bars.values_mut() {
            bars.limit(n);
        }
    }

    /// Clip every series to the strict interior of (start, end).
    pub async fn limit_time(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        for bars in inner.bars.values_mut() {
            *bars = bars.time_span(start, end);
        }
    }

    /// Cap on bars requested per downloader call; adjustable at runtime.
    pub fn set_max_limit(&self, limit: usize) {
        self.max_limit.store(limit.max(1), Ordering::Relaxed);
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit.load(Ordering::Relaxed)
    }

    /// Read persisted series for each key and install them. Best effort:
    /// unknown keys come back empty, a key that fails to load or add is
    /// logged and skipped.
    pub async fn load<S: AsRef<str>>(&self, symbols: &[S]) {
        for symbol in symbols {
            let symbol = symbol.as_ref();
            if split_symbol(symbol).is_none() {
                warn!(symbol = %symbol, "could not load: invalid symbol key");
                continue;
            }
            let bars = match self.persistence.load(symbol).await {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "could not read persisted bars");
                    continue;
                }
            };
            if let Err(e) = self.add(symbol, bars).await {
                debug!(symbol = %symbol, error = %e, "load skipped");
            }
        }
    }

    /// Central mutation: install or merge `bars` under `symbol`.
    ///
    /// Errors: empty symbol is invalid input; an identical newest bar with
    /// an unchanged length means nothing new; a merge collapsing below two
    /// bars drops the key. Every successful add publishes the key on the
    /// notification channel (non-blocking).
    pub async fn add(&self, symbol: &str, bars: BarSeries) -> Result<()> {
        if symbol.is_empty() {
            return Err(Error::InvalidInput("empty symbol".into()));
        }

        let existing = {
            let inner = self.inner.read().await;
            inner.bars.get(symbol).cloned()
        };
        let is_new = existing.is_none();

        if let Some(old) = &existing {
            if old.len() == bars.len() && old.last_bar() == bars.last_bar() {
                return Err(Error::NoNewBars);
            }
        }
        if bars.is_empty() {
            return Ok(());
        }

        // persist incoming bars for known keys; a failed write is logged,
        // never fatal (the in-memory series still advances)
        if !is_new {
            if let Err(e) = self.persistence.store(symbol, &bars).await {
                warn!(symbol = %symbol, error = %e, "could not persist bars");
            }
        }

        let added = bars.len();
        {
            let mut inner = self.inner.write().await;
            let old = inner.bars.remove(symbol).unwrap_or_default();
            let merged = BarSeries::merge(old, bars);
            if merged.len() < 2 {
                return Err(Error::HistoryTooShort);
            }
            inner.bars.insert(symbol.to_string(), merged);
        }

        if is_new {
            info!(symbol = %symbol, "loaded");
        } else {
            info!(symbol = %symbol, added, "added bars");
        }

        let _ = self.notify.send(symbol.to_string());
        Ok(())
    }

    /// Remove one key; a key without a timeframe suffix removes every key
    /// sharing that pair prefix. In-memory only — persisted data stays.
    pub async fn unload(&self, symbol: &str) {
        let mut inner = self.inner.write().await;
        match split_symbol(symbol) {
            Some(_) => {
                inner.bars.remove(symbol);
            }
            None => {
                inner
                    .bars
                    .retain(|key, _| split_symbol(key).map(|(pair, _)| pair) != Some(symbol));
            }
        }
        info!(symbol = %symbol, "unloaded");
    }

    /// Re-publish every current key on the notification channel so a fresh
    /// subscriber can process existing series without waiting for new data.
    pub async fn renotify(&self) {
        for key in self.keys().await {
            let _ = self.notify.send(key);
        }
    }

    /// Toggle the background refresh loop.
    ///
    /// Enabling spawns the loop and does not return until the first full
    /// refresh cycle has completed for every key present at the call.
    /// Disabling flips the flag; the loop observes it at the next iteration
    /// boundary (in-flight downloads are not interrupted).
    pub async fn update(&self, enabled: bool) {
        {
            let mut inner = self.inner.write().await;
            if inner.update == enabled {
                return;
            }
            inner.update = enabled;
        }
        if !enabled {
            return;
        }

        info!("updates enabled");
        let (first_cycle_tx, first_cycle_rx) = oneshot::channel();
        let store = self.clone();
        tokio::spawn(async move { store.update_loop(first_cycle_tx).await });
        let _ = first_cycle_rx.await;
    }

    async fn update_loop(self, first_cycle: oneshot::Sender<()>) {
        let mut first_cycle = Some(first_cycle);
        loop {
            if !self.inner.read().await.update {
                info!("updates disabled");
                return;
            }

            self.refresh_cycle().await;

            if let Some(tx) = first_cycle.take() {
                let _ = tx.send(());
            }
            tokio::time::sleep(self.config.update_interval()).await;
        }
    }

    /// One pass over all keys: figure out how far each series lags, fan the
    /// fetches out concurrently and wait for the whole cycle.
    async fn refresh_cycle(&self) {
        let max_limit = self.max_limit();
        let now = Utc::now();

        let work: Vec<(String, usize)> = {
            let inner = self.inner.read().await;
            inner
                .bars
                .iter()
                .filter_map(|(symbol, bars)| {
                    let limit = match bars.last_bar() {
                        Some(last) => bars_behind(now, last.time, bars.period()),
                        None => max_limit,
                    };
                    let limit = limit.min(max_limit);
                    (limit > 1).then(|| (symbol.clone(), limit))
                })
                .collect()
        };

        let mut tasks = JoinSet::new();
        for (symbol, limit) in work {
            let store = self.clone();
            tasks.spawn(async move { store.refresh_symbol(symbol, limit).await });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Download `limit` bars for one key and fold them in. The newest
    /// fetched bar is assumed in progress and dropped; a series whose newest
    /// complete bar is older than two periods is evicted as outdated.
    async fn refresh_symbol(self, symbol: String, limit: usize) {
        let Some((pair, timeframe)) = split_symbol(&symbol) else {
            warn!(symbol = %symbol, "cannot refresh: invalid symbol key");
            return;
        };

        let mut tries = 0;
        let bars = loop {
            match self.downloader.fetch(pair, timeframe, limit).await {
                Ok(bars) => break bars,
                Err(e) => {
                    tries += 1;
                    if tries >= self.config.max_tries {
                        warn!(
                            symbol = %symbol,
                            limit,
                            tries,
                            error = %e,
                            "download failed, giving up until next cycle"
                        );
                        return;
                    }
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        };

        // only the in-progress bar came back: nothing complete to add
        if bars.len() < 2 {
            return;
        }

        let period = bars.period();
        if let Some(last) = bars.last_bar() {
            if Utc::now() - period * 2 > last.time {
                self.inner.write().await.bars.remove(&symbol);
                warn!(symbol = %symbol, "outdated, removed from store");
                return;
            }
        }

        let complete: BarSeries = bars.into_vec().split_off(1).into();
        if let Err(e) = self.add(&symbol, complete).await {
            debug!(symbol = %symbol, error = %e, "refresh add skipped");
        }
    }
}

/// Whole bars elapsed between `last` (a bar open time) and `now`.
fn bars_behind(now: DateTime<Utc>, last: DateTime<Utc>, period: Duration) -> usize {
    let period_secs = period.num_seconds();
    if period_secs <= 0 {
        return 0;
    }
    let behind = (now - last).num_seconds() / period_secs;
    behind.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_bars::series;
    use async_trait::async_trait;
    use common::Timeframe;

    struct NoDownloader;

    #[async_trait]
    impl Downloader for NoDownloader {
        async fn fetch(&self, _: &str, _: Timeframe, _: usize) -> Result<BarSeries> {
            Err(Error::Download("offline".into()))
        }
    }

    struct NoPersistence;

    #[async_trait]
    impl Persistence for NoPersistence {
        async fn list_keys(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn load(&self, _: &str) -> Result<BarSeries> {
            Ok(BarSeries::new())
        }
        async fn store(&self, _: &str, _: &BarSeries) -> Result<()> {
            Ok(())
        }
    }

    fn store() -> Store {
        Store::new(
            Arc::new(NoDownloader),
            Arc::new(NoPersistence),
            StoreConfig::default(),
        )
    }

    #[tokio::test]
    async fn add_rejects_empty_symbol() {
        let s = store();
        assert!(matches!(
            s.add("", series(&[2, 1]).sort()).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn identical_re_add_reports_no_new_bars_and_no_token() {
        let s = store();
        let bars = series(&[10, 9]).sort();
        s.add("BTCUSDT1h", bars.clone()).await.unwrap();

        let mut rx = s.subscribe();
        assert!(matches!(
            s.add("BTCUSDT1h", bars.clone()).await,
            Err(Error::NoNewBars)
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(s.get_bars("BTCUSDT1h").await, bars);
    }

    #[tokio::test]
    async fn merge_add_notifies_subscribers() {
        let s = store();
        s.add("BTCUSDT1h", series(&[10, 9]).sort()).await.unwrap();

        let mut rx = s.subscribe();
        s.add("BTCUSDT1h", series(&[11, 10]).sort()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "BTCUSDT1h");
        let times: Vec<i64> = s
            .get_bars("BTCUSDT1h")
            .await
            .iter()
            .map(|b| b.time.timestamp() / 60)
            .collect();
        assert_eq!(times, vec![11, 10, 9]);
    }

    #[tokio::test]
    async fn add_with_empty_series_is_a_no_op() {
        let s = store();
        s.add("BTCUSDT1h", BarSeries::new()).await.unwrap();
        assert!(s.keys().await.is_empty());
    }

    #[tokio::test]
    async fn single_bar_history_is_dropped() {
        let s = store();
        assert!(matches!(
            s.add("BTCUSDT1h", series(&[10]).sort()).await,
            Err(Error::HistoryTooShort)
        ));
        assert!(s.keys().await.is_empty());
    }

    #[tokio::test]
    async fn unload_by_pair_prefix_removes_all_timeframes() {
        let s = store();
        s.add("BTCUSDT1h", series(&[2, 1]).sort()).await.unwrap();
        s.add("BTCUSDT4h", series(&[2, 1]).sort()).await.unwrap();
        s.add("ETHUSDT1h", series(&[2, 1]).sort()).await.unwrap();

        s.unload("BTCUSDT").await;
        assert_eq!(s.keys().await, vec!["ETHUSDT1h"]);

        s.unload("ETHUSDT1h").await;
        assert!(s.keys().await.is_empty());
    }

    #[tokio::test]
    async fn reductions_across_series() {
        let s = store();
        s.add("A1h", series(&[10, 5]).sort()).await.unwrap();
        s.add("B1h", series(&[8, 7, 6]).sort()).await.unwrap();

        assert_eq!(s.min_period().await, Duration::minutes(1));
        assert_eq!(s.first_time().await.unwrap().timestamp() / 60, 5);
        assert_eq!(s.last_time().await.unwrap().timestamp() / 60, 10);
    }

    #[tokio::test]
    async fn limit_and_limit_time_truncate_in_place() {
        let s = store();
        s.add("A1h", series(&[5, 4, 3, 2, 1]).sort()).await.unwrap();

        s.limit(3).await;
        assert_eq!(s.get_bars("A1h").await.len(), 3);

        s.limit_time(
            chrono::DateTime::from_timestamp(3 * 60, 0).unwrap(),
            chrono::DateTime::from_timestamp(5 * 60, 0).unwrap(),
        )
        .await;
        let times: Vec<i64> = s
            .get_bars("A1h")
            .await
            .iter()
            .map(|b| b.time.timestamp() / 60)
            .collect();
        assert_eq!(times, vec![4]);
    }

    #[tokio::test]
    async fn renotify_pushes_every_key() {
        let s = store();
        s.add("A1h", series(&[2, 1]).sort()).await.unwrap();
        s.add("B1h", series(&[2, 1]).sort()).await.unwrap();

        let mut rx = s.subscribe();
        s.renotify().await;
        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort();
        assert_eq!(got, vec!["A1h", "B1h"]);
    }

    #[test]
    fn bars_behind_counts_whole_periods() {
        let now = Utc::now();
        let period = Duration::minutes(60);
        assert_eq!(bars_behind(now, now, period), 0);
        assert_eq!(bars_behind(now, now - Duration::minutes(90), period), 1);
        assert_eq!(bars_behind(now, now - Duration::minutes(600), period), 10);
        // a future-stamped bar never produces a fetch
        assert_eq!(bars_behind(now, now + Duration::minutes(90), period), 0);
    }
}
