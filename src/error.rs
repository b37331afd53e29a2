// =============================================================================
// Error types at the pipeline's module boundaries
// =============================================================================
//
// Network plumbing and application glue use `anyhow`; the variants below are
// the failures a caller is expected to match on.
// =============================================================================

use thiserror::Error;

/// Failure of a historical candle fetch. The whole fetch may be retried.
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("klines request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("klines request returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not JSON at all.
    #[error("klines response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// Fixture or other local source could not be read.
    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// A streamed frame that could not be turned into a candle update.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing field {0}")]
    MissingField(&'static str),
}

/// Rejected indicator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1, got {value}")]
    InvalidPeriod { field: &'static str, value: usize },

    #[error("invalid indicator config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by chart state operations driven by the consumer.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_mentions_code_and_body() {
        let err = DataSourceError::Status {
            status: 418,
            body: "teapot".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("418"));
        assert!(msg.contains("teapot"));
    }

    #[test]
    fn config_error_converts_into_chart_error() {
        let err: ChartError = ConfigError::InvalidPeriod {
            field: "emaFast",
            value: 0,
        }
        .into();
        assert!(matches!(err, ChartError::Config(_)));
        assert_eq!(err.to_string(), "emaFast must be at least 1, got 0");
    }
}
