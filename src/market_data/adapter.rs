use async_trait::async_trait;

use crate::error::DataSourceError;
use crate::market_data::subscription::Subscription;
use crate::types::{Candle, Interval};

/// Upper bound on a single history request.
pub const MAX_HISTORY_LIMIT: u32 = 1000;

/// A source of candles: a bounded history fetch plus a live subscription.
///
/// Implementations never keep candle history themselves; the consumer owns
/// the window.
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    /// Up to `limit` most recent candles for `symbol`/`interval`, oldest first.
    async fn fetch_history(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError>;

    /// Open a live stream of updates. Must be called inside a tokio runtime.
    fn subscribe_realtime(&self, symbol: &str, interval: Interval) -> Subscription;
}

/// Stream key for a symbol/interval pair, e.g. `btcusdt@kline_1m`.
pub fn stream_key(symbol: &str, interval: Interval) -> String {
    format!("{}@kline_{}", symbol.trim().to_lowercase(), interval)
}
