use chrono::{DateTime, Duration, Utc};

use common::Bar;

use crate::series::BarSeries;

/// Smallest and largest replay step. The upper bound is seven weeks — wide
/// enough for any supported timeframe.
const MIN_STEP_MINUTES: i64 = 1;
const MAX_STEP_MINUTES: i64 = 70_560;

/// Chronological bar emitter over a fixed time window.
///
/// Produced by [`BarSeries::stream_interval`]. Emits the bar sitting exactly
/// on each step boundary, oldest first; boundaries with no bar yield a
/// zero-time marker ([`Bar::is_zero`]) that callers skip. The sequence is
/// finite and cannot be restarted.
#[derive(Debug)]
pub struct BarStream {
    bars: BarSeries,
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
}

impl Iterator for BarStream {
    type Item = Bar;

    fn next(&mut self) -> Option<Bar> {
        if self.cursor >= self.end {
            return None;
        }
        self.cursor += self.step;
        match self.bars.find(self.cursor) {
            Some((_, bar)) => Some(bar),
            None => Some(Bar::default()),
        }
    }
}

impl BarSeries {
    /// Replay the series over `[start, end]` at `step` intervals.
    ///
    /// `start`/`end` default to the series bounds when unset and are clamped
    /// into them otherwise; `step` is clamped to [1 minute, 70560 minutes].
    /// The first emission is the bar at the (clamped) start itself.
    pub fn stream_interval(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        step: Duration,
    ) -> BarStream {
        let (Some(first), Some(last)) = (self.first_bar(), self.last_bar()) else {
            // empty series: a stream that is exhausted from the start
            return BarStream {
                bars: BarSeries::new(),
                cursor: DateTime::<Utc>::UNIX_EPOCH,
                end: DateTime::<Utc>::UNIX_EPOCH,
                step: Duration::minutes(MIN_STEP_MINUTES),
            };
        };

        let start = match start {
            Some(t) if t > first.time => t,
            _ => first.time,
        };
        let end = match end {
            Some(t) if t < last.time => t,
            _ => last.time,
        };

        let step = step
            .max(Duration::minutes(MIN_STEP_MINUTES))
            .min(Duration::minutes(MAX_STEP_MINUTES));

        BarStream {
            bars: self.clone(),
            // one step back so the first tick lands on `start` itself
            cursor: start - step,
            end,
            step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::test_bars::series;
    use chrono::TimeZone;

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(m * 60, 0).unwrap()
    }

    #[test]
    fn replays_oldest_first_over_whole_window() {
        let s = series(&[5, 4, 3, 2, 1]).sort();
        let times: Vec<i64> = s
            .stream_interval(Some(minute(0)), Some(minute(6)), s.period())
            .filter(|b| !b.is_zero())
            .map(|b| b.time.timestamp() / 60)
            .collect();
        assert_eq!(times, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn unset_bounds_use_series_bounds() {
        let s = series(&[4, 3, 2]).sort();
        let times: Vec<i64> = s
            .stream_interval(None, None, s.period())
            .filter(|b| !b.is_zero())
            .map(|b| b.time.timestamp() / 60)
            .collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn bounds_are_clamped_into_the_series() {
        let s = series(&[5, 4, 3]).sort();
        let times: Vec<i64> = s
            .stream_interval(Some(minute(4)), Some(minute(100)), s.period())
            .filter(|b| !b.is_zero())
            .map(|b| b.time.timestamp() / 60)
            .collect();
        assert_eq!(times, vec![4, 5]);
    }

    #[test]
    fn gaps_emit_zero_time_markers() {
        let s = series(&[5, 4, 2, 1]).sort();
        let emitted: Vec<(i64, bool)> = s
            .stream_interval(None, None, Duration::minutes(1))
            .map(|b| (b.time.timestamp() / 60, b.is_zero()))
            .collect();
        assert_eq!(
            emitted,
            vec![(1, false), (2, false), (0, true), (4, false), (5, false)]
        );
    }

    #[test]
    fn step_is_clamped_to_at_least_one_minute() {
        let s = series(&[3, 2, 1]).sort();
        let count = s
            .stream_interval(None, None, Duration::seconds(1))
            .filter(|b| !b.is_zero())
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_series_streams_nothing() {
        let s = BarSeries::new();
        assert_eq!(s.stream_interval(None, None, Duration::minutes(1)).count(), 0);
    }
}
