use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of signal a strategy can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    MarketBuy,
    MarketSell,
    LimitBuy,
    LimitSell,
    StopBuy,
    StopSell,
    Close,
    News,
    Forecast,
    Other,
}

impl EventKind {
    /// Order kinds that open exposure (everything except Close and the
    /// informational kinds).
    pub fn is_open(self) -> bool {
        matches!(
            self,
            EventKind::MarketBuy
                | EventKind::MarketSell
                | EventKind::LimitBuy
                | EventKind::LimitSell
                | EventKind::StopBuy
                | EventKind::StopSell
        )
    }

    pub fn is_buy(self) -> bool {
        matches!(
            self,
            EventKind::MarketBuy | EventKind::LimitBuy | EventKind::StopBuy
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::MarketBuy => "MARKET_BUY",
            EventKind::MarketSell => "MARKET_SELL",
            EventKind::LimitBuy => "LIMIT_BUY",
            EventKind::LimitSell => "LIMIT_SELL",
            EventKind::StopBuy => "STOP_BUY",
            EventKind::StopSell => "STOP_SELL",
            EventKind::Close => "CLOSE",
            EventKind::News => "NEWS",
            EventKind::Forecast => "FORECAST",
            EventKind::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// A signal produced by a strategy at a specific bar.
///
/// Identity for deduplication is (symbol, time, price, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub symbol: String,
    pub name: String,
    pub text: String,
    pub kind: EventKind,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub time: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
}

impl Event {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: String::new(),
            text: String::new(),
            kind: EventKind::Other,
            time: DateTime::<Utc>::UNIX_EPOCH,
            price: 0.0,
            size: 0.0,
        }
    }

    /// Deduplication identity check.
    pub fn same_signal(&self, other: &Event) -> bool {
        self.symbol == other.symbol
            && self.time == other.time
            && self.price == other.price
            && self.kind == other.kind
    }
}

/// Deduplicated collection of events, kept chronological ascending by
/// [`EventSet::sort`]. `first_event`/`last_event` assume sorted order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSet {
    events: Vec<Event>,
}

impl EventSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Append if the event is valid (non-empty symbol, non-zero price) and
    /// not already present under the (symbol, time, price, kind) identity.
    pub fn add(&mut self, event: Event) -> bool {
        if event.symbol.is_empty() || event.price == 0.0 {
            return false;
        }
        if self.events.iter().any(|old| old.same_signal(&event)) {
            return false;
        }
        self.events.push(event);
        true
    }

    /// Remove an exactly matching event.
    pub fn delete(&mut self, event: &Event) -> bool {
        if let Some(i) = self.events.iter().position(|e| e == event) {
            self.events.remove(i);
            true
        } else {
            false
        }
    }

    /// Exact-time lookup. Only scans when `time` is within the collection's
    /// chronological bounds.
    pub fn find(&self, time: DateTime<Utc>) -> Option<(usize, &Event)> {
        let first = self.first_event()?;
        let last = self.last_event()?;
        if first.time > time || last.time < time {
            return None;
        }
        self.events
            .iter()
            .enumerate()
            .find(|(_, e)| e.time == time)
    }

    /// Subset for one symbol, preserving order.
    pub fn symbol(&self, symbol: &str) -> EventSet {
        EventSet {
            events: self
                .events
                .iter()
                .filter(|e| e.symbol == symbol)
                .cloned()
                .collect(),
        }
    }

    pub fn group_by_symbol(&self) -> HashMap<String, EventSet> {
        let mut map: HashMap<String, EventSet> = HashMap::new();
        for event in &self.events {
            map.entry(event.symbol.clone())
                .or_default()
                .events
                .push(event.clone());
        }
        map
    }

    /// Stable chronological ascending sort.
    pub fn sort(&mut self) {
        self.events.sort_by(|a, b| a.time.cmp(&b.time));
    }

    /// Earliest event, assuming sorted ascending.
    pub fn first_event(&self) -> Option<&Event> {
        self.events.first()
    }

    /// Latest event, assuming sorted ascending.
    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl IntoIterator for EventSet {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventSet {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<Event> for EventSet {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut set = EventSet::new();
        for event in iter {
            set.add(event);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(symbol: &str, secs: i64, price: f64, kind: EventKind) -> Event {
        Event {
            symbol: symbol.into(),
            name: "test".into(),
            text: String::new(),
            kind,
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            price,
            size: 0.0,
        }
    }

    #[test]
    fn kind_predicates() {
        assert!(EventKind::MarketBuy.is_open());
        assert!(EventKind::StopSell.is_open());
        assert!(!EventKind::Close.is_open());
        assert!(!EventKind::News.is_open());
        assert!(EventKind::LimitBuy.is_buy());
        assert!(!EventKind::MarketSell.is_buy());
        assert_eq!(EventKind::MarketBuy.to_string(), "MARKET_BUY");
    }

    #[test]
    fn add_rejects_invalid_events() {
        let mut set = EventSet::new();
        assert!(!set.add(event("", 10, 1.0, EventKind::MarketBuy)));
        assert!(!set.add(event("BTCUSDT1h", 10, 0.0, EventKind::MarketBuy)));
        assert!(set.is_empty());
    }

    #[test]
    fn add_deduplicates_by_symbol_time_price_kind() {
        let mut set = EventSet::new();
        assert!(set.add(event("X", 10, 5.0, EventKind::MarketBuy)));
        // same identity but different kind is a distinct signal
        assert!(set.add(event("X", 10, 5.0, EventKind::MarketSell)));
        // exact repeat is rejected
        assert!(!set.add(event("X", 10, 5.0, EventKind::MarketBuy)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn delete_removes_exact_match_only() {
        let mut set = EventSet::new();
        let e = event("X", 10, 5.0, EventKind::Close);
        set.add(e.clone());
        let mut other = e.clone();
        other.name = "different".into();
        assert!(!set.delete(&other));
        assert!(set.delete(&e));
        assert!(set.is_empty());
    }

    #[test]
    fn sort_and_bounds() {
        let mut set = EventSet::new();
        set.add(event("X", 30, 1.0, EventKind::Other));
        set.add(event("X", 10, 2.0, EventKind::Other));
        set.add(event("X", 20, 3.0, EventKind::Other));
        set.sort();
        assert_eq!(set.first_event().unwrap().time.timestamp(), 10);
        assert_eq!(set.last_event().unwrap().time.timestamp(), 30);
        let (i, found) = set.find(Utc.timestamp_opt(20, 0).unwrap()).unwrap();
        assert_eq!(i, 1);
        assert_eq!(found.price, 3.0);
        assert!(set.find(Utc.timestamp_opt(40, 0).unwrap()).is_none());
    }

    #[test]
    fn group_by_symbol_partitions() {
        let mut set = EventSet::new();
        set.add(event("A", 10, 1.0, EventKind::Other));
        set.add(event("B", 11, 1.0, EventKind::Other));
        set.add(event("A", 12, 2.0, EventKind::Other));
        let map = set.group_by_symbol();
        assert_eq!(map["A"].len(), 2);
        assert_eq!(map["B"].len(), 1);
        assert_eq!(set.symbol("A").len(), 2);
    }
}
