use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Candle width. The canonical tag is what [`fmt::Display`] renders and what
/// symbol keys embed ("BTCUSDT4h").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H8 => 480,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1_440,
            Timeframe::D3 => 4_320,
            Timeframe::W1 => 10_080,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Canonical textual tag ("1m", "4h", "1d", ...).
    pub fn tag(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    /// Case-insensitive parse accepting the tag, the reversed spelling
    /// ("m5"), bare unit letters ("h", "d", "w"), and the minute count.
    /// Unknown input yields `None`.
    pub fn parse(s: &str) -> Option<Timeframe> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "m1" | "1" => Some(Timeframe::M1),
            "3m" | "m3" | "3" => Some(Timeframe::M3),
            "5m" | "m5" | "5" => Some(Timeframe::M5),
            "15m" | "m15" | "15" => Some(Timeframe::M15),
            "30m" | "m30" | "30" => Some(Timeframe::M30),
            "1h" | "h1" | "h" | "60" => Some(Timeframe::H1),
            "4h" | "h4" | "240" => Some(Timeframe::H4),
            "6h" | "h6" | "360" => Some(Timeframe::H6),
            "8h" | "h8" | "480" => Some(Timeframe::H8),
            "12h" | "h12" | "720" => Some(Timeframe::H12),
            "1d" | "d1" | "d" | "1440" => Some(Timeframe::D1),
            "3d" | "d3" | "4320" => Some(Timeframe::D3),
            "1w" | "w1" | "w" | "10080" => Some(Timeframe::W1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Timeframe::parse(s).ok_or_else(|| Error::InvalidInput(format!("unknown timeframe '{s}'")))
    }
}

/// Format a symbol key: pair and timeframe tag concatenated, no delimiter.
pub fn symbol_key(pair: &str, timeframe: Timeframe) -> String {
    format!("{pair}{timeframe}")
}

/// Recover (pair, timeframe) from a symbol key by trying suffixes longest
/// first against the timeframe table. The pair must be non-empty; keys
/// without a recognisable timeframe suffix yield `None`.
pub fn split_symbol(symbol: &str) -> Option<(&str, Timeframe)> {
    // The whole key reading as a timeframe means there is no pair at all.
    if Timeframe::parse(symbol).is_some() {
        return None;
    }
    for (split, _) in symbol.char_indices().skip(1) {
        let (pair, tail) = symbol.split_at(split);
        if let Some(tf) = Timeframe::parse(tail) {
            return Some((pair, tf));
        }
    }
    None
}
