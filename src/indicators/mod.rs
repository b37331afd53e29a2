// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Indicators are pure: the same candles and configuration always yield the
// same output, inputs are never mutated and every call builds fresh
// structures. Each indicator owns a strongly typed configuration; JSON only
// appears at the consumer boundary through `DynIndicator`.

pub mod ema;
pub mod ema_cross;
pub mod registry;
pub mod render;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Candle;

pub use ema_cross::{EmaCross, EmaCrossConfig};
pub use registry::IndicatorRegistry;
pub use render::{
    IndicatorRender, Marker, MarkerPosition, MarkerShape, Overlay, SeriesOptions, SeriesPoint,
    SeriesType,
};

/// A chart indicator with its own configuration type.
pub trait Indicator: Send + Sync + 'static {
    type Config: Clone + Default + Serialize + DeserializeOwned + Send + Sync;

    /// Stable identifier used by the registry and the consumer API.
    const ID: &'static str;
    /// Human readable name.
    const LABEL: &'static str;

    /// Reject configurations the indicator cannot work with.
    fn validate(&self, _config: &Self::Config) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Compute overlays and markers for `candles` (oldest first). Never fails;
    /// an empty window gives structurally valid empty output.
    fn compute(&self, candles: &[Candle], config: &Self::Config) -> IndicatorRender;
}

/// Object-safe view of an [`Indicator`] with JSON configuration, as stored in
/// the registry.
pub trait DynIndicator: Send + Sync {
    fn id(&self) -> &'static str;
    fn label(&self) -> &'static str;

    /// Default configuration as JSON.
    fn default_config(&self) -> serde_json::Value;

    /// Parse and validate a JSON configuration. Missing keys take their
    /// defaults, unknown keys are dropped. Returns the normalised form.
    fn parse_config(&self, raw: &serde_json::Value) -> Result<serde_json::Value, ConfigError>;

    /// Compute with a JSON configuration.
    fn compute_json(
        &self,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<IndicatorRender, ConfigError>;
}

impl<T: Indicator> DynIndicator for T {
    fn id(&self) -> &'static str {
        T::ID
    }

    fn label(&self) -> &'static str {
        T::LABEL
    }

    fn default_config(&self) -> serde_json::Value {
        serde_json::to_value(T::Config::default()).unwrap_or(serde_json::Value::Null)
    }

    fn parse_config(&self, raw: &serde_json::Value) -> Result<serde_json::Value, ConfigError> {
        let config = typed_config::<T>(self, raw)?;
        Ok(serde_json::to_value(config)?)
    }

    fn compute_json(
        &self,
        candles: &[Candle],
        config: &serde_json::Value,
    ) -> Result<IndicatorRender, ConfigError> {
        let config = typed_config::<T>(self, config)?;
        Ok(self.compute(candles, &config))
    }
}

fn typed_config<T: Indicator>(
    indicator: &T,
    raw: &serde_json::Value,
) -> Result<T::Config, ConfigError> {
    let config: T::Config = serde_json::from_value(raw.clone())?;
    indicator.validate(&config)?;
    Ok(config)
}

/// Candle field an indicator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Open,
    High,
    Low,
    #[default]
    Close,
}

impl PriceSource {
    pub fn of(&self, candle: &Candle) -> f64 {
        match self {
            Self::Open => candle.open,
            Self::High => candle.high,
            Self::Low => candle.low,
            Self::Close => candle.close,
        }
    }

    /// The selected field of every candle, oldest first.
    pub fn extract(&self, candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| self.of(c)).collect()
    }
}
