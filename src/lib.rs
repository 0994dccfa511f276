//! Minute-resolution market data for simulation.
//!
//! Two halves, split at a publish barrier:
//!
//! - the **column store** ([`store`]): an append-only, memory-mapped store of
//!   per-minute OHLCV bars, one segment per asset, addressed by pure offset
//!   arithmetic over the trading calendar;
//! - the **point-in-time accessor** ([`bar_data`]): tradability, staleness,
//!   and forward-fill semantics over the store, answering spot-value queries
//!   as a simulation clock walks forward minute by minute.
//!
//! ```text
//! MinuteBarWriter --(publish)--> segments --(mmap)--> MinuteBarReader
//!                                                          |
//!     TradingCalendar ----- minute addressing -------- BarData
//!     AssetDirectory ------ sid resolution ---------------'
//! ```

pub mod assets;
pub mod bar_data;
pub mod bars;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod store;


pub use assets::{Asset, AssetDirectory, Sid};
pub use bar_data::{BarData, SpotValue, TradingState};
pub use bars::{Bar, Field, OHLC_RATIO};
pub use calendar::{Session, TradingCalendar, US_EQUITIES_MINUTES_PER_SESSION};
pub use clock::{Minute, SimClock};
pub use error::{BarDataError, Result};
pub use store::{MinuteBarReader, MinuteBarWriter};
