//! Live candlestick feed with pluggable chart indicators.
//!
//! A [`pipeline::ChartPipeline`] loads history and merges live kline updates
//! from a [`market_data::MarketDataAdapter`] into [`chart_state::ChartState`],
//! which recomputes the enabled indicators on every change and serves the
//! result over the [`api`] router.

pub mod api;
pub mod chart_state;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod pipeline;
pub mod runtime_config;
pub mod types;

pub use chart_state::{ChartSnapshot, ChartState, MarketSelection};
pub use error::{ChartError, ConfigError, DataSourceError, FrameError};
pub use pipeline::ChartPipeline;
pub use runtime_config::RuntimeConfig;
pub use types::{Candle, Interval, KlineUpdate};
