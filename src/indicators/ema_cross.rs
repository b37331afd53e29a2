// =============================================================================
// EMA Cross Scanner
// =============================================================================
//
// Two signal EMAs (fast/slow) plus two slower trend EMAs drawn as a shaded
// band. A marker is placed wherever the fast EMA crosses the slow one:
//
//   diff_t = emaFast_t - emaSlow_t
//   bull  : diff_{t-1} <= 0 && diff_t > 0
//   bear  : diff_{t-1} >= 0 && diff_t < 0
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::calculate_ema;
use super::render::{
    IndicatorRender, Marker, MarkerPosition, MarkerShape, Overlay, SeriesOptions, SeriesPoint,
    SeriesType,
};
use super::{Indicator, PriceSource};
use crate::error::ConfigError;
use crate::types::Candle;

const FAST_COLOR: &str = "#2196F3";
const SLOW_COLOR: &str = "#F44336";
const TREND_COLOR: &str = "#4CAF50";
const BAND_COLOR: &str = "rgba(76, 175, 80, 0.5)";
const TREND_OPACITY: f32 = 0.3;

const BULL_COLOR: &str = "#4CAF50";
const BEAR_COLOR: &str = "#F44336";

fn default_ema_fast() -> usize {
    33
}

fn default_ema_slow() -> usize {
    55
}

fn default_trend_fast() -> usize {
    100
}

fn default_trend_slow() -> usize {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmaCrossConfig {
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_trend_fast")]
    pub trend_fast: usize,
    #[serde(default = "default_trend_slow")]
    pub trend_slow: usize,
    #[serde(default)]
    pub source: PriceSource,
}

impl Default for EmaCrossConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            trend_fast: default_trend_fast(),
            trend_slow: default_trend_slow(),
            source: PriceSource::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmaCross;

impl Indicator for EmaCross {
    type Config = EmaCrossConfig;

    const ID: &'static str = "emaCross";
    const LABEL: &'static str = "EMA Cross Scanner";

    fn validate(&self, config: &EmaCrossConfig) -> Result<(), ConfigError> {
        let periods = [
            ("emaFast", config.ema_fast),
            ("emaSlow", config.ema_slow),
            ("trendFast", config.trend_fast),
            ("trendSlow", config.trend_slow),
        ];
        for (field, value) in periods {
            if value == 0 {
                return Err(ConfigError::InvalidPeriod { field, value });
            }
        }
        Ok(())
    }

    fn compute(&self, candles: &[Candle], config: &EmaCrossConfig) -> IndicatorRender {
        let values = config.source.extract(candles);

        let ema_fast = calculate_ema(&values, config.ema_fast);
        let ema_slow = calculate_ema(&values, config.ema_slow);
        let trend_fast = calculate_ema(&values, config.trend_fast);
        let trend_slow = calculate_ema(&values, config.trend_slow);

        let band: Vec<SeriesPoint> = candles
            .iter()
            .zip(trend_fast.iter().zip(&trend_slow))
            .map(|(c, (&upper, &lower))| SeriesPoint {
                t: c.open_time,
                value: finite_or_zero(upper),
                base_value: Some(finite_or_zero(lower)),
            })
            .collect();

        let overlays = vec![
            line("emaFast", candles, &ema_fast, SeriesOptions::line(FAST_COLOR, 2.0)),
            line("emaSlow", candles, &ema_slow, SeriesOptions::line(SLOW_COLOR, 2.0)),
            line(
                "trendFast",
                candles,
                &trend_fast,
                SeriesOptions::line(TREND_COLOR, 1.0).with_opacity(TREND_OPACITY),
            ),
            line(
                "trendSlow",
                candles,
                &trend_slow,
                SeriesOptions::line(TREND_COLOR, 1.0).with_opacity(TREND_OPACITY),
            ),
            Overlay {
                id: "trendBand".to_string(),
                series_type: SeriesType::Area,
                data: band,
                options: Some(SeriesOptions::line(BAND_COLOR, 0.0)),
            },
        ];

        IndicatorRender {
            overlays,
            markers: cross_markers(candles, &ema_fast, &ema_slow),
        }
    }
}

fn line(id: &str, candles: &[Candle], values: &[f64], options: SeriesOptions) -> Overlay {
    Overlay {
        id: id.to_string(),
        series_type: SeriesType::Line,
        data: candles
            .iter()
            .zip(values)
            .map(|(c, &v)| SeriesPoint::new(c.open_time, finite_or_zero(v)))
            .collect(),
        options: Some(options),
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn cross_markers(candles: &[Candle], fast: &[f64], slow: &[f64]) -> Vec<Marker> {
    let mut markers = Vec::new();

    for i in 1..candles.len().min(fast.len()).min(slow.len()) {
        let prev = fast[i - 1] - slow[i - 1];
        let curr = fast[i] - slow[i];

        if prev <= 0.0 && curr > 0.0 {
            markers.push(Marker {
                t: candles[i].open_time,
                position: MarkerPosition::BelowBar,
                shape: MarkerShape::ArrowUp,
                color: Some(BULL_COLOR.to_string()),
                text: Some("Bull Cross".to_string()),
                size: None,
            });
        } else if prev >= 0.0 && curr < 0.0 {
            markers.push(Marker {
                t: candles[i].open_time,
                position: MarkerPosition::AboveBar,
                shape: MarkerShape::ArrowDown,
                color: Some(BEAR_COLOR.to_string()),
                text: Some("Bear Cross".to_string()),
                size: None,
            });
        }
    }

    markers
}
