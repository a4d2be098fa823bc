use std::io::Write;
use std::ops::Deref;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{Bar, Result};

/// Ordered sequence of bars for one symbol key, descending by time:
/// index 0 is the newest bar, the last element the oldest.
///
/// The descending invariant is pervasive — every indicator and every
/// strategy window assumes it. Mutating operations keep it intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BarSeries(Vec<Bar>);

impl BarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort descending by time (stable) and return self for chaining.
    pub fn sort(mut self) -> Self {
        self.0.sort_by(|a, b| b.time.cmp(&a.time));
        self
    }

    /// New series with the element order flipped.
    pub fn reverse(&self) -> BarSeries {
        BarSeries(self.0.iter().rev().copied().collect())
    }

    /// Interval between the two newest bars. Falls back to one minute when
    /// the series holds fewer than two bars.
    pub fn period(&self) -> Duration {
        if self.0.len() < 2 {
            return Duration::minutes(1);
        }
        self.0[0].time - self.0[1].time
    }

    /// Oldest bar in the series.
    pub fn first_bar(&self) -> Option<Bar> {
        self.0.last().copied()
    }

    /// Newest bar in the series.
    pub fn last_bar(&self) -> Option<Bar> {
        self.0.first().copied()
    }

    /// Exact-time lookup. Returns the index and the bar, or `None` when the
    /// time is outside the series range or no bar sits exactly there.
    pub fn find(&self, time: DateTime<Utc>) -> Option<(usize, Bar)> {
        let first = self.first_bar()?;
        let last = self.last_bar()?;
        if first.time > time || last.time < time {
            return None;
        }
        self.0
            .iter()
            .enumerate()
            .find(|(_, b)| b.time == time)
            .map(|(i, b)| (i, *b))
    }

    /// Bars strictly inside (start, end), sorted descending.
    pub fn time_span(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> BarSeries {
        BarSeries(
            self.0
                .iter()
                .filter(|b| b.time > start && b.time < end)
                .copied()
                .collect(),
        )
        .sort()
    }

    /// Union of two series by bar time.
    ///
    /// New bars strictly outside old's [oldest, newest] span are appended; a
    /// new bar sharing an old bar's exact time replaces it; interior times
    /// with no exact counterpart are discarded (they would punch holes in a
    /// span the store already considers settled). Result is sorted.
    pub fn merge(old: BarSeries, new: BarSeries) -> BarSeries {
        if old.is_empty() {
            return new.sort();
        }
        let first = old.first_bar().map(|b| b.time);
        let last = old.last_bar().map(|b| b.time);
        let (Some(first), Some(last)) = (first, last) else {
            return new.sort();
        };

        let mut merged = old;
        for bar in new.0 {
            if bar.time > last || bar.time < first {
                merged.0.push(bar);
            } else if let Some(i) = merged.0.iter().position(|b| b.time == bar.time) {
                merged.0[i] = bar;
            }
        }
        merged.sort()
    }

    /// Keep only the newest `n` bars.
    pub fn limit(&mut self, n: usize) {
        self.0.truncate(n);
    }

    /// Insert a bar at the newest position. Used by replay harnesses that
    /// grow a window chronologically.
    pub fn prepend(&mut self, bar: Bar) {
        self.0.insert(0, bar);
    }

    pub fn push(&mut self, bar: Bar) {
        self.0.push(bar);
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Bar> {
        self.0
    }

    /// Write the series as CSV (time RFC3339, then OHLCV), newest first.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "time,open,high,low,close,volume")?;
        for bar in &self.0 {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                bar.time.to_rfc3339(),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume
            )?;
        }
        Ok(())
    }
}

impl Deref for BarSeries {
    type Target = [Bar];

    fn deref(&self) -> &[Bar] {
        &self.0
    }
}

impl From<Vec<Bar>> for BarSeries {
    fn from(bars: Vec<Bar>) -> Self {
        BarSeries(bars)
    }
}

impl FromIterator<Bar> for BarSeries {
    fn from_iter<I: IntoIterator<Item = Bar>>(iter: I) -> Self {
        BarSeries(iter.into_iter().collect())
    }
}

impl IntoIterator for BarSeries {
    type Item = Bar;
    type IntoIter = std::vec::IntoIter<Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
pub(crate) mod test_bars {
    use super::*;
    use chrono::TimeZone;

    /// Flat-priced bars at minute offsets `minutes` (descending input not
    /// required; caller sorts when it matters).
    pub fn series(minutes: &[i64]) -> BarSeries {
        minutes.iter().map(|&m| bar(m, 100.0)).collect()
    }

    pub fn bar(minute: i64, close: f64) -> Bar {
        Bar {
            time: Utc.timestamp_opt(minute * 60, 0).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 10.0,
        }
    }
}
