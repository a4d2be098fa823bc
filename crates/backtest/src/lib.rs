//! Historical replay harness: reconstructs the live strategy view bar by bar
//! over a time window and records the emitted events, optionally tracking a
//! simulated portfolio.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use common::{Error, EventSet, Result};
use history::{BarSeries, Store};
use portfolio::PortfolioStats;
use strategy::Strategy;

/// Outcome of one backtest run.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    /// Accepted (deduplicated) events, chronological ascending.
    pub events: EventSet,
    /// Final portfolio statistics when the strategy exposes a portfolio.
    pub portfolio: Option<PortfolioStats>,
}

/// Replays stored history through a strategy.
pub struct Backtester;

impl Backtester {
    /// Run `strategy` over every series in the store, clipped to
    /// `[start, end]`, stepping each series at its own period.
    ///
    /// Keys are processed sequentially in sorted order so traces are
    /// deterministic; within one key the strategy sees strictly
    /// time-ascending calls with a monotonically growing window, exactly as
    /// the live pump would feed it.
    pub async fn test(
        store: &Store,
        strategy: &dyn Strategy,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TestResult> {
        let all = store.all().await;
        if all.is_empty() {
            return Err(Error::NotFound);
        }

        info!(
            strategy = %strategy.name(),
            start = %start,
            end = %end,
            symbols = all.len(),
            "backtest started"
        );

        let mut symbols: Vec<&String> = all.keys().collect();
        symbols.sort();

        let mut events = EventSet::new();
        for symbol in symbols {
            let bars = &all[symbol];
            let step = bars.period();

            let mut window = BarSeries::new();
            for bar in bars.stream_interval(Some(start), Some(end), step) {
                if bar.is_zero() {
                    continue;
                }
                window.prepend(bar);

                if let Some(portfolio) = strategy.portfolio() {
                    portfolio.update_price(symbol, bar.close);
                }
                strategy.set_context(symbol, &bar);

                let outcome =
                    catch_unwind(AssertUnwindSafe(|| strategy.on_bar(symbol, &window)));
                let event = match outcome {
                    Ok(event) => event,
                    Err(_) => {
                        error!(
                            strategy = %strategy.name(),
                            symbol = %symbol,
                            time = %bar.time,
                            "strategy panicked, bar skipped"
                        );
                        continue;
                    }
                };

                if let Some(event) = event {
                    if !events.add(event) {
                        debug!(symbol = %symbol, time = %bar.time, "duplicate event dropped");
                    }
                }
            }
        }

        events.sort();
        let portfolio = strategy.portfolio().map(|p| p.stats());

        info!(
            strategy = %strategy.name(),
            events = events.len(),
            "backtest completed"
        );
        Ok(TestResult { events, portfolio })
    }
}
