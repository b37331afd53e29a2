pub mod adapter;
pub mod binance;
pub mod candle_window;
pub mod fixture;
pub mod reconnect;
pub mod subscription;

pub use adapter::{stream_key, MarketDataAdapter, MAX_HISTORY_LIMIT};
pub use binance::BinanceAdapter;
pub use candle_window::{CandleWindow, MergeKind, MergeOutcome, DEFAULT_WINDOW_CAPACITY};
pub use fixture::{FixtureAdapter, FixtureData};
pub use reconnect::{Backoff, ConnectionState, ReconnectPolicy};
pub use subscription::{FrameStream, KlineTransport, Subscription};
