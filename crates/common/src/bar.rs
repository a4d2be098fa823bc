use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle. `time` is the bar open instant, UTC.
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high`,
/// `volume >= 0`. A default bar carries the Unix epoch as its time and is
/// used as the "miss" marker by the stream replay — see [`Bar::is_zero`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Default for Bar {
    fn default() -> Self {
        Self {
            time: DateTime::<Utc>::UNIX_EPOCH,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
        }
    }
}

/// Which scalar to read from a bar when an indicator asks for "the price".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Price {
    O,
    H,
    L,
    C,
    Hl2,
    Hlc3,
    Ohlc4,
    V,
}

impl Bar {
    /// Read one scalar according to the price mode.
    pub fn mode(&self, mode: Price) -> f64 {
        match mode {
            Price::O => self.open,
            Price::H => self.high,
            Price::L => self.low,
            Price::C => self.close,
            Price::Hl2 => self.hl2(),
            Price::Hlc3 => self.hlc3(),
            Price::Ohlc4 => self.ohlc4(),
            Price::V => self.volume,
        }
    }

    /// Midpoint price (high + low) / 2.
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// Typical price (high + low + close) / 3.
    pub fn hlc3(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Average price (open + high + low + close) / 4.
    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    /// Full bar range, high - low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size, |close - open|.
    pub fn body(&self) -> f64 {
        self.body_high() - self.body_low()
    }

    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Upper wick, high - max(open, close).
    pub fn wick_up(&self) -> f64 {
        self.high - self.body_high()
    }

    /// Lower wick, min(open, close) - low.
    pub fn wick_dn(&self) -> f64 {
        self.body_low() - self.low
    }

    pub fn bull(&self) -> bool {
        self.close > self.open
    }

    pub fn bear(&self) -> bool {
        self.open > self.close
    }

    /// Closes in the upper third of the range.
    pub fn bullish(&self) -> bool {
        self.close >= self.high - self.range() / 3.0
    }

    /// Closes in the lower third of the range.
    pub fn bearish(&self) -> bool {
        self.close <= self.low + self.range() / 3.0
    }

    /// Close-over-open move in percent.
    pub fn perc_move(&self) -> f64 {
        100.0 * ((self.close - self.open) / self.open)
    }

    /// Marker for "no bar at this time" produced by the stream replay.
    pub fn is_zero(&self) -> bool {
        self.time.timestamp() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Bar {
        Bar {
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 108.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn derived_views() {
        let b = sample();
        assert_eq!(b.range(), 20.0);
        assert_eq!(b.body(), 8.0);
        assert_eq!(b.wick_up(), 2.0);
        assert_eq!(b.wick_dn(), 10.0);
        assert!(b.bull());
        assert!(!b.bear());
        // close 108 is within the top third of [90, 110]
        assert!(b.bullish());
        assert!(!b.bearish());
        assert!((b.perc_move() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn midpoints_use_correct_parenthesisation() {
        let b = sample();
        assert_eq!(b.mode(Price::Hl2), 100.0);
        assert!((b.mode(Price::Hlc3) - (110.0 + 90.0 + 108.0) / 3.0).abs() < f64::EPSILON);
        assert!((b.mode(Price::Ohlc4) - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn default_bar_is_zero_marker() {
        assert!(Bar::default().is_zero());
        assert!(!sample().is_zero());
    }

    #[test]
    fn json_round_trip_uses_unix_seconds() {
        let b = sample();
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json["time"], 1_700_000_000i64);
        let back: Bar = serde_json::from_value(json).unwrap();
        assert_eq!(back, b);
    }
}
