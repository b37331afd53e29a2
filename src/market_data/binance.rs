// =============================================================================
// Binance market data — public klines REST endpoint + kline WebSocket stream
// =============================================================================
//
// Only public endpoints are used, so requests are unsigned. Numeric fields
// arrive as JSON strings (sometimes numbers); they are parsed leniently and
// garbage becomes NaN rather than an error.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::error::{DataSourceError, FrameError};
use crate::market_data::adapter::{stream_key, MarketDataAdapter, MAX_HISTORY_LIMIT};
use crate::market_data::reconnect::ReconnectPolicy;
use crate::market_data::subscription::{FrameStream, KlineTransport, Subscription};
use crate::types::{Candle, Interval, KlineUpdate};

pub const DEFAULT_REST_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

// -----------------------------------------------------------------------------
// Adapter
// -----------------------------------------------------------------------------

/// Binance spot market data source.
#[derive(Clone)]
pub struct BinanceAdapter {
    rest_base_url: String,
    client: reqwest::Client,
    transport: Arc<TungsteniteTransport>,
    reconnect: ReconnectPolicy,
}

impl BinanceAdapter {
    /// Create an adapter against the given REST and WebSocket base URLs.
    ///
    /// `http_timeout` bounds each history request.
    pub fn new(
        rest_base_url: impl Into<String>,
        ws_base_url: impl Into<String>,
        http_timeout: Duration,
        reconnect: ReconnectPolicy,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .context("failed to build reqwest client")?;

        let rest_base_url: String = rest_base_url.into();
        let rest_base_url = rest_base_url.trim_end_matches('/').to_string();
        let ws_base_url: String = ws_base_url.into();
        let ws_base_url = ws_base_url.trim_end_matches('/').to_string();
        debug!(rest = %rest_base_url, ws = %ws_base_url, "BinanceAdapter initialised");

        Ok(Self {
            rest_base_url,
            client,
            transport: Arc::new(TungsteniteTransport { ws_base_url }),
            reconnect,
        })
    }
}

#[async_trait]
impl MarketDataAdapter for BinanceAdapter {
    /// GET /api/v3/klines (public).
    ///
    /// Array indices used: [0] openTime, [1] open, [2] high, [3] low,
    /// [4] close, [5] volume. Trailing fields are ignored.
    #[instrument(skip(self), name = "binance::fetch_history")]
    async fn fetch_history(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        let symbol = symbol.trim().to_uppercase();
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.rest_base_url, symbol, interval, limit
        );
        debug!(url = %url, "fetching historical klines");

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "klines request rejected");
            return Err(DataSourceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: serde_json::Value = serde_json::from_str(&text)?;
        let candles = parse_klines_body(&body);
        debug!(symbol = %symbol, interval = %interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    fn subscribe_realtime(&self, symbol: &str, interval: Interval) -> Subscription {
        Subscription::spawn(
            self.transport.clone(),
            stream_key(symbol, interval),
            self.reconnect,
            parse_kline_frame,
        )
    }
}

impl std::fmt::Debug for BinanceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceAdapter")
            .field("rest_base_url", &self.rest_base_url)
            .field("ws_base_url", &self.transport.ws_base_url)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// WebSocket transport
// -----------------------------------------------------------------------------

/// Opens `{ws_base_url}/{stream_key}` and yields its text frames.
pub struct TungsteniteTransport {
    ws_base_url: String,
}

#[async_trait]
impl KlineTransport for TungsteniteTransport {
    async fn connect(&self, stream_key: &str) -> anyhow::Result<FrameStream> {
        let url = format!("{}/{}", self.ws_base_url, stream_key);
        info!(url = %url, "connecting to kline WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to kline WebSocket")?;

        let (_write, read) = ws_stream.split();

        // Ping / Pong / Binary frames are skipped; tungstenite answers pings
        // itself. A Close frame ends the stream.
        let frames = read
            .take_while(|msg| futures_util::future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow::Error::new(e))),
                }
            })
            .boxed();

        Ok(frames)
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

/// Turn a klines response body into candles.
///
/// A body that is not an array yields no candles. Entries that are not arrays
/// or lack an integer open time are skipped.
pub fn parse_klines_body(body: &serde_json::Value) -> Vec<Candle> {
    let Some(raw) = body.as_array() else {
        warn!(body = %body, "klines response is not an array -- returning no candles");
        return Vec::new();
    };

    if raw.is_empty() {
        warn!("klines response is empty");
        return Vec::new();
    }

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(arr) = entry.as_array() else {
            warn!(entry = %entry, "skipping kline entry that is not an array");
            continue;
        };
        let Some(open_time) = arr.first().and_then(serde_json::Value::as_i64) else {
            warn!(entry = %entry, "skipping kline entry without integer open time");
            continue;
        };
        let field = |idx: usize| arr.get(idx).map_or(f64::NAN, lenient_f64);

        candles.push(Candle::new(
            open_time,
            field(1),
            field(2),
            field(3),
            field(4),
            field(5),
        ));
    }

    candles
}

/// Parse a kline stream frame (single-stream payload or combined-stream
/// `{"stream": ..., "data": ...}` envelope).
pub fn parse_kline_frame(text: &str) -> Result<KlineUpdate, FrameError> {
    let root: serde_json::Value = serde_json::from_str(text)?;

    let data = root.get("data").unwrap_or(&root);
    let k = data.get("k").ok_or(FrameError::MissingField("k"))?;

    let open_time = k
        .get("t")
        .and_then(serde_json::Value::as_i64)
        .ok_or(FrameError::MissingField("k.t"))?;
    let field = |name: &str| k.get(name).map_or(f64::NAN, lenient_f64);
    let is_final = k.get("x").and_then(serde_json::Value::as_bool).unwrap_or(false);

    Ok(KlineUpdate {
        candle: Candle::new(
            open_time,
            field("o"),
            field("h"),
            field("l"),
            field("c"),
            field("v"),
        ),
        is_final,
    })
}

/// Binance sends decimals as JSON strings; accept numbers too. Anything else
/// becomes NaN.
fn lenient_f64(val: &serde_json::Value) -> f64 {
    match val {
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
