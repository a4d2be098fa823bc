pub mod base;
pub mod bus;

pub use base::BaseStrategy;
pub use bus::{EventBus, EventCallback, EventSink, HandlerId};

use common::{Bar, Event};
use history::BarSeries;
use portfolio::PortfolioManager;

/// All strategy implementations must satisfy this trait.
///
/// `bars` is the descending-time window ending at the bar under evaluation
/// (index 0 is that bar). `on_bar` takes `&self` because one instance may be
/// shared between the live pump and a backtest harness — stateful strategies
/// guard their state with their own lock (see [`BaseStrategy`]).
pub trait Strategy: Send + Sync {
    /// Stable name identifying this strategy instance.
    fn name(&self) -> &str;

    /// Evaluate the window and optionally emit an event.
    fn on_bar(&self, symbol: &str, bars: &BarSeries) -> Option<Event>;

    /// Portfolio capability hook. Harnesses use it to mark open positions to
    /// market before each call. Bare strategies keep the default.
    fn portfolio(&self) -> Option<&PortfolioManager> {
        None
    }

    /// Context capability hook, called by harnesses before `on_bar` with the
    /// bar about to be evaluated. Bare strategies keep the default no-op.
    fn set_context(&self, _symbol: &str, _bar: &Bar) {}
}
