// =============================================================================
// Shared types used across the chart feed pipeline
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Candle
// =============================================================================

/// One OHLCV bucket. Candles are identified by `open_time` alone.
///
/// Serialised with the short field names (`t`, `o`, `h`, `l`, `c`, `v`) that
/// the chart consumer expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket open time, epoch milliseconds.
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Open time as a UTC timestamp, if it is representable.
    pub fn open_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.open_time)
    }
}

/// A single streamed candle update. `is_final` is set once the bucket closed;
/// the same `open_time` is usually delivered many times before that.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineUpdate {
    pub candle: Candle,
    pub is_final: bool,
}

// =============================================================================
// Interval
// =============================================================================

/// Candle timeframes offered to the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::FourHours,
        Interval::OneDay,
    ];

    /// Exchange wire representation (`"1m"`, `"1h"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::OneHour
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|iv| iv.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("unsupported interval: {s}"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_serialises_with_short_names() {
        let candle = Candle::new(1_000, 1.0, 2.0, 0.5, 1.5, 10.0);
        let json = serde_json::to_value(candle).unwrap();
        assert_eq!(json["t"], 1_000);
        assert_eq!(json["c"], 1.5);
        assert!(json.get("close").is_none());
    }

    #[test]
    fn interval_parses_wire_strings() {
        for iv in Interval::ALL {
            assert_eq!(iv.as_str().parse::<Interval>().unwrap(), iv);
        }
        assert!("2m".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_serde_matches_wire_string() {
        let json = serde_json::to_string(&Interval::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15m\"");
        let back: Interval = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(back, Interval::FourHours);
    }

    #[test]
    fn open_time_utc_converts() {
        let candle = Candle::new(0, 1.0, 1.0, 1.0, 1.0, 0.0);
        assert_eq!(candle.open_time_utc().unwrap().timestamp(), 0);
    }
}
