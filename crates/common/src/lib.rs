pub mod bar;
pub mod error;
pub mod event;
pub mod timeframe;

pub use bar::{Bar, Price};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventSet};
pub use timeframe::{split_symbol, symbol_key, Timeframe};
