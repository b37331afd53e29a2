// =============================================================================
// Recorded fixture — offline market data source
// =============================================================================
//
// Serves a fixed history batch and replays a scripted list of live updates at
// a constant pace. After the script is exhausted the connection stays open and
// silent, like an idle exchange stream.
// =============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DataSourceError, FrameError};
use crate::market_data::adapter::{stream_key, MarketDataAdapter, MAX_HISTORY_LIMIT};
use crate::market_data::reconnect::ReconnectPolicy;
use crate::market_data::subscription::{FrameStream, KlineTransport, Subscription};
use crate::types::{Candle, Interval, KlineUpdate};

fn default_pace_ms() -> u64 {
    1_000
}

/// On-disk fixture layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub history: Vec<Candle>,
    #[serde(default)]
    pub updates: Vec<KlineUpdate>,
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
}

/// Market data source backed by recorded candles.
#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    history: Arc<Vec<Candle>>,
    transport: Arc<FixtureTransport>,
}

impl FixtureAdapter {
    pub fn new(data: FixtureData) -> Self {
        let transport = FixtureTransport {
            updates: data.updates,
            pace: Duration::from_millis(data.pace_ms),
        };
        Self {
            history: Arc::new(data.history),
            transport: Arc::new(transport),
        }
    }

    /// Load a fixture from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture from {}", path.display()))?;
        let data: FixtureData = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse fixture from {}", path.display()))?;

        info!(
            path = %path.display(),
            history = data.history.len(),
            updates = data.updates.len(),
            "fixture loaded"
        );
        Ok(Self::new(data))
    }
}

#[async_trait]
impl MarketDataAdapter for FixtureAdapter {
    async fn fetch_history(
        &self,
        _symbol: &str,
        _interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, DataSourceError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT) as usize;
        let start = self.history.len().saturating_sub(limit);
        Ok(self.history[start..].to_vec())
    }

    fn subscribe_realtime(&self, symbol: &str, interval: Interval) -> Subscription {
        Subscription::spawn(
            self.transport.clone(),
            stream_key(symbol, interval),
            ReconnectPolicy::default(),
            parse_update_json,
        )
    }
}

#[derive(Debug)]
struct FixtureTransport {
    updates: Vec<KlineUpdate>,
    pace: Duration,
}

#[async_trait]
impl KlineTransport for FixtureTransport {
    async fn connect(&self, _stream_key: &str) -> anyhow::Result<FrameStream> {
        let frames = self
            .updates
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to encode fixture updates")?;
        let pace = self.pace;

        let replay = stream::iter(frames)
            .then(move |frame| async move {
                tokio::time::sleep(pace).await;
                Ok::<_, anyhow::Error>(frame)
            })
            .chain(stream::pending());
        Ok(replay.boxed())
    }
}

/// Fixture frames are serialised [`KlineUpdate`]s.
fn parse_update_json(text: &str) -> Result<KlineUpdate, FrameError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle::new(open_time, close, close, close, close, 1.0)
    }

    fn fixture() -> FixtureAdapter {
        FixtureAdapter::new(FixtureData {
            history: (0..5).map(|i| candle(i * 60_000, 100.0 + i as f64)).collect(),
            updates: vec![
                KlineUpdate {
                    candle: candle(240_000, 110.0),
                    is_final: true,
                },
                KlineUpdate {
                    candle: candle(300_000, 111.0),
                    is_final: false,
                },
            ],
            pace_ms: 500,
        })
    }

    #[tokio::test]
    async fn history_respects_limit() {
        let adapter = fixture();
        let candles = adapter
            .fetch_history("BTCUSDT", Interval::OneMinute, 2)
            .await
            .unwrap();
        let times: Vec<i64> = candles.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![180_000, 240_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_updates_in_order() {
        let adapter = fixture();
        let mut sub = adapter.subscribe_realtime("BTCUSDT", Interval::OneMinute);

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(first.is_final);
        assert_eq!(first.candle.close, 110.0);
        assert_eq!(second.candle.open_time, 300_000);
        assert!(!second.is_final);
        sub.unsubscribe();
    }

    #[test]
    fn fixture_file_format() {
        let json = r#"{
            "history": [{ "t": 0, "o": 1, "h": 2, "l": 0.5, "c": 1.5, "v": 10 }],
            "updates": [{ "candle": { "t": 60000, "o": 1, "h": 2, "l": 0.5, "c": 1.5, "v": 10 }, "isFinal": true }]
        }"#;
        let data: FixtureData = serde_json::from_str(json).unwrap();
        assert_eq!(data.history.len(), 1);
        assert!(data.updates[0].is_final);
        assert_eq!(data.pace_ms, 1_000);
    }
}
