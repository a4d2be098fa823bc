use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use common::{Bar, Event, EventKind};
use portfolio::{PortfolioManager, Side};

/// Per-call context a harness sets before invoking `on_bar`: which symbol is
/// being evaluated and where the current bar closed.
#[derive(Debug, Clone, Default)]
struct Context {
    symbol: String,
    time: DateTime<Utc>,
    price: f64,
}

/// Composition helper for strategies that trade a simulated portfolio.
///
/// Owns the [`PortfolioManager`] and the current evaluation context, and
/// offers the buy/sell/close helpers that turn a decision into an [`Event`]
/// plus the matching portfolio mutation. Strategies that only observe the
/// market can skip it and implement the bare `Strategy` contract.
pub struct BaseStrategy {
    portfolio: PortfolioManager,
    ctx: Mutex<Context>,
    default_size: f64,
}

impl BaseStrategy {
    pub fn new(initial_balance: f64, default_size: f64) -> Self {
        Self {
            portfolio: PortfolioManager::new(initial_balance),
            ctx: Mutex::new(Context::default()),
            default_size,
        }
    }

    pub fn portfolio(&self) -> &PortfolioManager {
        &self.portfolio
    }

    /// Refresh the evaluation context. Harnesses call this before `on_bar`.
    pub fn set_context(&self, symbol: &str, bar: &Bar) {
        let mut ctx = self.context();
        ctx.symbol = symbol.to_string();
        ctx.time = bar.time;
        ctx.price = bar.close;
    }

    fn context(&self) -> MutexGuard<'_, Context> {
        self.ctx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Market-buy the configured default size at the context price.
    pub fn buy(&self) -> Option<Event> {
        let (price, ..) = self.context_snapshot();
        self.buy_event(self.default_size, price)
    }

    /// Market-sell (short) the configured default size at the context price.
    pub fn sell(&self) -> Option<Event> {
        let (price, ..) = self.context_snapshot();
        self.sell_event(self.default_size, price)
    }

    /// Open a long of `size` at `price`. No-op when the balance cannot cover
    /// the size or a position is already open for the context symbol.
    pub fn buy_event(&self, size: f64, price: f64) -> Option<Event> {
        self.open(Side::Long, EventKind::MarketBuy, size, price)
    }

    /// Open a short of `size` at `price`, same preconditions as
    /// [`BaseStrategy::buy_event`].
    pub fn sell_event(&self, size: f64, price: f64) -> Option<Event> {
        self.open(Side::Short, EventKind::MarketSell, size, price)
    }

    fn open(&self, side: Side, kind: EventKind, size: f64, price: f64) -> Option<Event> {
        let (_, time, symbol) = self.context_snapshot();
        if symbol.is_empty() || self.portfolio.balance() < size {
            return None;
        }

        let event = Event {
            symbol: symbol.clone(),
            name: String::new(),
            text: format!("{side} {size:.2} @ {price:.8}"),
            kind,
            time,
            price,
            size,
        };
        self.portfolio
            .open_position(&symbol, side, time, price, size, event.clone())
            .ok()?;
        Some(event)
    }

    /// Close the context symbol's open position at the context price.
    pub fn close(&self) -> Option<Event> {
        let (price, _, symbol) = self.context_snapshot();
        let position = self.portfolio.position(&symbol)?;
        self.close_event(&position.open_event, price)
    }

    /// Close the position opened by `open_event` at `price` and synthesise
    /// the matching close event. The referenced event must be of an opening
    /// kind.
    pub fn close_event(&self, open_event: &Event, price: f64) -> Option<Event> {
        if !open_event.kind.is_open() {
            return None;
        }
        let (_, time, _) = self.context_snapshot();
        let pnl = self.portfolio.close_position(&open_event.symbol, price)?;

        Some(Event {
            symbol: open_event.symbol.clone(),
            name: open_event.name.clone(),
            text: format!(
                "entry {:.8} exit {price:.8} size {:.2} pnl {pnl:.2}",
                open_event.price, open_event.size
            ),
            kind: EventKind::Close,
            time,
            price,
            size: open_event.size,
        })
    }

    /// Do nothing this bar.
    pub fn sit(&self) -> Option<Event> {
        None
    }

    fn context_snapshot(&self) -> (f64, DateTime<Utc>, String) {
        let ctx = self.context();
        (ctx.price, ctx.time, ctx.symbol.clone())
    }
}
