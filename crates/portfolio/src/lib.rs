//! Position ledger and P&L accounting for simulated trading.
//!
//! One [`PortfolioManager`] is exclusively owned by one strategy; every
//! mutating operation is serialised by a single mutex so strategies can call
//! in from synchronous code.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Error, Event, Result};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// One open exposure. At most one position per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Notional committed at entry; debited from the balance while open.
    pub size: f64,
    /// Base-asset quantity, size / entry_price.
    pub units: f64,
    pub current_price: f64,
    pub unrealised_pnl: f64,
    /// The event that opened this position, kept for close bookkeeping.
    pub open_event: Event,
}

impl Position {
    fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) * self.units,
            Side::Short => (self.entry_price - price) * self.units,
        }
    }

    /// Notional plus unrealised P&L at the current price.
    pub fn value(&self) -> f64 {
        self.size + self.unrealised_pnl
    }
}

/// Snapshot of portfolio performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub initial_balance: f64,
    /// Equity: free balance plus the value of every open position.
    pub current_balance: f64,
    pub realised_pnl: f64,
    pub unrealised_pnl: f64,
    pub total_pnl: f64,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub high_water_mark: f64,
    pub max_drawdown: f64,
}

struct Ledger {
    balance: f64,
    positions: HashMap<String, Position>,
    stats: PortfolioStats,
}

/// Tracks open positions, realised and unrealised P&L, and aggregate
/// statistics against an initial balance.
pub struct PortfolioManager {
    inner: Mutex<Ledger>,
}

impl PortfolioManager {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            inner: Mutex::new(Ledger {
                balance: initial_balance,
                positions: HashMap::new(),
                stats: PortfolioStats {
                    initial_balance,
                    current_balance: initial_balance,
                    high_water_mark: initial_balance,
                    ..PortfolioStats::default()
                },
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Free (uncommitted) balance.
    pub fn balance(&self) -> f64 {
        self.ledger().balance
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.ledger().positions.get(symbol).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.ledger().positions.values().cloned().collect()
    }

    /// Commit `size` of the balance to a new position. Only one position per
    /// symbol; the notional must be covered by the free balance.
    pub fn open_position(
        &self,
        symbol: &str,
        side: Side,
        entry_time: DateTime<Utc>,
        entry_price: f64,
        size: f64,
        open_event: Event,
    ) -> Result<()> {
        if symbol.is_empty() {
            return Err(Error::InvalidInput("empty symbol".into()));
        }
        if entry_price <= 0.0 {
            return Err(Error::InvalidInput("entry price must be positive".into()));
        }
        if size <= 0.0 {
            return Err(Error::InvalidInput("size must be positive".into()));
        }

        let mut ledger = self.ledger();
        if ledger.positions.contains_key(symbol) {
            return Err(Error::InvalidInput(format!(
                "position already open for {symbol}"
            )));
        }
        if size > ledger.balance {
            return Err(Error::InvalidInput(format!(
                "size {size:.2} exceeds balance {:.2}",
                ledger.balance
            )));
        }

        ledger.balance -= size;
        ledger.positions.insert(
            symbol.to_string(),
            Position {
                symbol: symbol.to_string(),
                side,
                entry_time,
                entry_price,
                size,
                units: size / entry_price,
                current_price: entry_price,
                unrealised_pnl: 0.0,
                open_event,
            },
        );
        ledger.update_stats();

        info!(symbol = %symbol, side = %side, entry = entry_price, size, "position opened");
        Ok(())
    }

    /// Refresh the current price and unrealised P&L of the symbol's open
    /// position, if any.
    pub fn update_price(&self, symbol: &str, price: f64) {
        let mut ledger = self.ledger();
        let Some(position) = ledger.positions.get_mut(symbol) else {
            return;
        };
        position.current_price = price;
        position.unrealised_pnl = position.pnl_at(price);
        ledger.update_stats();
    }

    /// Close the symbol's open position at `close_price`. Returns the
    /// realised P&L, or `None` when no position is open.
    pub fn close_position(&self, symbol: &str, close_price: f64) -> Option<f64> {
        let mut ledger = self.ledger();
        let position = ledger.positions.remove(symbol)?;

        let pnl = position.pnl_at(close_price);
        ledger.balance += position.size + pnl;
        ledger.stats.realised_pnl += pnl;
        ledger.stats.total_trades += 1;
        if pnl > 0.0 {
            ledger.stats.winning_trades += 1;
        } else if pnl < 0.0 {
            ledger.stats.losing_trades += 1;
        }
        ledger.update_stats();

        info!(symbol = %symbol, close = close_price, pnl, "position closed");
        Some(pnl)
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> PortfolioStats {
        self.ledger().stats.clone()
    }
}

impl Ledger {
    /// Recompute the derived statistics after any mutation.
    fn update_stats(&mut self) {
        let unrealised: f64 = self.positions.values().map(|p| p.unrealised_pnl).sum();
        let open_value: f64 = self.positions.values().map(Position::value).sum();

        let stats = &mut self.stats;
        stats.unrealised_pnl = unrealised;
        stats.current_balance = self.balance + open_value;
        stats.total_pnl = stats.realised_pnl + stats.unrealised_pnl;

        if stats.total_trades > 0 {
            stats.win_rate = f64::from(stats.winning_trades) / f64::from(stats.total_trades);
        }

        if stats.current_balance > stats.high_water_mark {
            stats.high_water_mark = stats.current_balance;
        }
        if stats.high_water_mark > 0.0 {
            let drawdown = (stats.high_water_mark - stats.current_balance) / stats.high_water_mark;
            if drawdown > stats.max_drawdown {
                stats.max_drawdown = drawdown;
                debug!(drawdown, "new max drawdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::EventKind;

    fn open_event(symbol: &str) -> Event {
        Event {
            symbol: symbol.into(),
            name: "test".into(),
            text: String::new(),
            kind: EventKind::MarketBuy,
            time: Utc.timestamp_opt(1_000, 0).unwrap(),
            price: 100.0,
            size: 2_000.0,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_000, 0).unwrap()
    }

    #[test]
    fn long_round_trip_books_profit() {
        let pm = PortfolioManager::new(10_000.0);
        pm.open_position("X1h", Side::Long, t0(), 100.0, 2_000.0, open_event("X1h"))
            .unwrap();
        assert_eq!(pm.balance(), 8_000.0);

        pm.update_price("X1h", 110.0);
        let stats = pm.stats();
        assert!((stats.unrealised_pnl - 200.0).abs() < 1e-9);
        assert!((stats.current_balance - 10_200.0).abs() < 1e-9);

        let pnl = pm.close_position("X1h", 110.0).unwrap();
        assert!((pnl - 200.0).abs() < 1e-9);

        let stats = pm.stats();
        assert!((pm.balance() - 10_200.0).abs() < 1e-9);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.winning_trades, 1);
        assert!((stats.win_rate - 1.0).abs() < f64::EPSILON);
        assert!(stats.high_water_mark >= 10_200.0);
        assert_eq!(stats.max_drawdown, 0.0);
    }

    #[test]
    fn short_profits_when_price_falls() {
        let pm = PortfolioManager::new(10_000.0);
        pm.open_position("S1h", Side::Short, t0(), 200.0, 1_000.0, open_event("S1h"))
            .unwrap();
        pm.update_price("S1h", 150.0);
        // units = 5, pnl = (200 - 150) * 5
        assert!((pm.stats().unrealised_pnl - 250.0).abs() < 1e-9);
        let pnl = pm.close_position("S1h", 150.0).unwrap();
        assert!((pnl - 250.0).abs() < 1e-9);
    }

    #[test]
    fn losses_drive_drawdown_and_counters() {
        let pm = PortfolioManager::new(10_000.0);
        pm.open_position("L1h", Side::Long, t0(), 100.0, 1_000.0, open_event("L1h"))
            .unwrap();
        pm.update_price("L1h", 90.0);
        let stats = pm.stats();
        assert!(stats.max_drawdown > 0.0);

        let pnl = pm.close_position("L1h", 90.0).unwrap();
        assert!((pnl + 100.0).abs() < 1e-9);
        let stats = pm.stats();
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.winning_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert!((stats.current_balance - 9_900.0).abs() < 1e-9);
    }

    #[test]
    fn one_position_per_symbol() {
        let pm = PortfolioManager::new(10_000.0);
        pm.open_position("D1h", Side::Long, t0(), 100.0, 1_000.0, open_event("D1h"))
            .unwrap();
        assert!(pm
            .open_position("D1h", Side::Long, t0(), 100.0, 1_000.0, open_event("D1h"))
            .is_err());
    }

    #[test]
    fn balance_gates_opening() {
        let pm = PortfolioManager::new(500.0);
        assert!(pm
            .open_position("B1h", Side::Long, t0(), 100.0, 1_000.0, open_event("B1h"))
            .is_err());
        assert_eq!(pm.balance(), 500.0);
        assert!(pm.position("B1h").is_none());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let pm = PortfolioManager::new(10_000.0);
        assert!(pm
            .open_position("", Side::Long, t0(), 100.0, 1_000.0, open_event(""))
            .is_err());
        assert!(pm
            .open_position("X1h", Side::Long, t0(), 0.0, 1_000.0, open_event("X1h"))
            .is_err());
        assert!(pm
            .open_position("X1h", Side::Long, t0(), 100.0, -5.0, open_event("X1h"))
            .is_err());
    }

    #[test]
    fn close_without_position_is_none() {
        let pm = PortfolioManager::new(10_000.0);
        assert!(pm.close_position("GHOST1h", 100.0).is_none());
        // update_price on an unknown symbol is a quiet no-op
        pm.update_price("GHOST1h", 100.0);
        assert_eq!(pm.stats().total_trades, 0);
    }
}
