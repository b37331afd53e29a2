// =============================================================================
// Chart State — single source of truth for the chart feed
// =============================================================================
//
// The pipeline writes candles and connection status, the consumer API writes
// the market selection and indicator settings. Every mutation that changes
// what a chart would draw recomputes the enabled indicators from the full
// window and bumps the version counter the WebSocket feed polls.
//
// Thread safety:
//   - AtomicU64 for lock-free version tracking.
//   - One parking_lot::RwLock over selection, window and outputs. Writers
//     check the market their data was fetched for and recompute under that
//     lock, so a snapshot never pairs candles with outputs of another window.
//   - Lock order is data, then indicators.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ChartError;
use crate::indicators::{DynIndicator, IndicatorRegistry, IndicatorRender};
use crate::market_data::{CandleWindow, ConnectionState, MergeOutcome};
use crate::types::{Candle, Interval, KlineUpdate};

/// The symbol/interval pair the chart is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSelection {
    pub symbol: String,
    pub interval: Interval,
}

/// Last error surfaced to the consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Per-chart settings of one registered indicator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorState {
    pub id: String,
    pub enabled: bool,
    pub config: serde_json::Value,
}

/// Output of one enabled indicator.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorOutput {
    pub id: String,
    #[serde(flatten)]
    pub render: IndicatorRender,
}

/// What a chart draws, kept under one lock: the market the window belongs
/// to, its candles and the outputs computed from exactly those candles.
struct ChartData {
    selection: MarketSelection,
    window: CandleWindow,
    outputs: Vec<IndicatorOutput>,
}

pub struct ChartState {
    state_version: AtomicU64,
    registry: Arc<IndicatorRegistry>,

    data: RwLock<ChartData>,
    selection_tx: watch::Sender<MarketSelection>,

    indicators: RwLock<Vec<IndicatorState>>,

    loading: RwLock<bool>,
    last_error: RwLock<Option<ErrorRecord>>,
    connection: RwLock<ConnectionState>,
}

impl ChartState {
    pub fn new(
        registry: Arc<IndicatorRegistry>,
        selection: MarketSelection,
        window_capacity: usize,
    ) -> Self {
        let (selection_tx, _) = watch::channel(selection.clone());
        Self {
            state_version: AtomicU64::new(1),
            registry,
            data: RwLock::new(ChartData {
                selection,
                window: CandleWindow::new(window_capacity),
                outputs: Vec::new(),
            }),
            selection_tx,
            indicators: RwLock::new(Vec::new()),
            loading: RwLock::new(false),
            last_error: RwLock::new(None),
            connection: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn registry(&self) -> &Arc<IndicatorRegistry> {
        &self.registry
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Market Selection ────────────────────────────────────────────────

    pub fn selection(&self) -> MarketSelection {
        self.data.read().selection.clone()
    }

    /// Watch receiver that fires whenever the market selection changes.
    pub fn subscribe_selection(&self) -> watch::Receiver<MarketSelection> {
        self.selection_tx.subscribe()
    }

    /// Switch the chart to another symbol or interval. Clears the window and
    /// outputs when the selection actually changes; returns whether it did.
    pub fn select_market(&self, symbol: &str, interval: Interval) -> Result<bool, ChartError> {
        let symbol = normalize_symbol(symbol)?;
        let next = MarketSelection { symbol, interval };

        let mut data = self.data.write();
        if data.selection == next {
            return Ok(false);
        }
        data.selection = next.clone();
        data.window.clear();
        data.outputs.clear();
        // Sent under the lock: watchers see selections in window order.
        self.selection_tx.send_replace(next.clone());
        self.increment_version();
        drop(data);

        info!(symbol = %next.symbol, interval = %next.interval, "market selection changed");
        Ok(true)
    }

    // ── Candles ─────────────────────────────────────────────────────────

    pub fn candles(&self) -> Vec<Candle> {
        self.data.read().window.to_vec()
    }

    /// Replace the window with a history batch fetched for `market`.
    ///
    /// Returns `false` and drops the batch when the chart has switched to
    /// another market since the fetch started.
    pub fn replace_history(&self, market: &MarketSelection, history: Vec<Candle>) -> bool {
        let mut data = self.data.write();
        if data.selection != *market {
            debug!(
                symbol = %market.symbol,
                interval = %market.interval,
                "dropping history fetched for a previous market"
            );
            return false;
        }

        let count = history.len();
        data.window.replace_all(history);
        debug!(candles = count, "history loaded into window");
        self.recompute_locked(&mut data);
        true
    }

    /// Merge one live update received for `market` into the window.
    ///
    /// Returns `None` when the update belongs to a market the chart no longer
    /// shows.
    pub fn apply_update(
        &self,
        market: &MarketSelection,
        update: &KlineUpdate,
    ) -> Option<MergeOutcome> {
        let mut data = self.data.write();
        if data.selection != *market {
            debug!(symbol = %market.symbol, "dropping live update for a previous market");
            return None;
        }

        let outcome = data.window.merge(update.candle);
        if update.is_final {
            debug!(
                open_time = ?update.candle.open_time_utc(),
                close = update.candle.close,
                "candle closed"
            );
        }
        self.recompute_locked(&mut data);
        Some(outcome)
    }

    // ── Indicators ──────────────────────────────────────────────────────

    /// Attach a registered indicator to the chart, disabled, with `defaults`
    /// or the indicator's own defaults. A second call for the same id keeps
    /// the existing settings and returns `false`.
    pub fn register_indicator(
        &self,
        id: &str,
        defaults: Option<serde_json::Value>,
    ) -> Result<bool, ChartError> {
        let indicator = self
            .registry
            .get(id)
            .ok_or_else(|| ChartError::UnknownIndicator(id.to_string()))?;

        if self.indicators.read().iter().any(|s| s.id == id) {
            return Ok(false);
        }

        let config = match defaults {
            Some(raw) => indicator.parse_config(&raw)?,
            None => indicator.default_config(),
        };

        let mut indicators = self.indicators.write();
        if indicators.iter().any(|s| s.id == id) {
            return Ok(false);
        }
        indicators.push(IndicatorState {
            id: id.to_string(),
            enabled: false,
            config,
        });
        drop(indicators);

        self.increment_version();
        Ok(true)
    }

    /// Attach every indicator in the registry with its defaults.
    pub fn register_all(&self) {
        for indicator in self.registry.get_all() {
            if let Err(e) = self.register_indicator(indicator.id(), None) {
                warn!(indicator = indicator.id(), error = %e, "failed to attach indicator");
            }
        }
    }

    pub fn indicator_states(&self) -> Vec<IndicatorState> {
        self.indicators.read().clone()
    }

    /// Indicator states with their display labels, for consumers.
    pub fn indicator_summaries(&self) -> Vec<IndicatorSummary> {
        self.indicators
            .read()
            .iter()
            .map(|s| IndicatorSummary {
                id: s.id.clone(),
                label: self
                    .registry
                    .get(&s.id)
                    .map(|i| i.label())
                    .unwrap_or_default()
                    .to_string(),
                enabled: s.enabled,
                config: s.config.clone(),
            })
            .collect()
    }

    pub fn set_indicator_enabled(&self, id: &str, enabled: bool) -> Result<(), ChartError> {
        {
            let mut indicators = self.indicators.write();
            let state = indicators
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| ChartError::UnknownIndicator(id.to_string()))?;
            if state.enabled == enabled {
                return Ok(());
            }
            state.enabled = enabled;
        }

        info!(indicator = id, enabled, "indicator toggled");
        self.recompute();
        Ok(())
    }

    /// Validate and store a new configuration. Returns the normalised config.
    pub fn set_indicator_config(
        &self,
        id: &str,
        raw: &serde_json::Value,
    ) -> Result<serde_json::Value, ChartError> {
        let indicator = self
            .registry
            .get(id)
            .ok_or_else(|| ChartError::UnknownIndicator(id.to_string()))?;
        let config = indicator.parse_config(raw)?;

        {
            let mut indicators = self.indicators.write();
            let state = indicators
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| ChartError::UnknownIndicator(id.to_string()))?;
            state.config = config.clone();
        }

        info!(indicator = id, config = %config, "indicator config updated");
        self.recompute();
        Ok(config)
    }

    /// Outputs of the enabled indicators, in registration order.
    pub fn outputs(&self) -> Vec<IndicatorOutput> {
        self.data.read().outputs.clone()
    }

    pub fn output(&self, id: &str) -> Option<IndicatorOutput> {
        self.data.read().outputs.iter().find(|o| o.id == id).cloned()
    }

    fn recompute(&self) {
        let mut data = self.data.write();
        self.recompute_locked(&mut data);
    }

    /// Recompute every enabled indicator from the full window. The caller
    /// holds the data write lock, so outputs always match the window.
    fn recompute_locked(&self, data: &mut ChartData) {
        let candles = data.window.to_vec();
        let states = self.indicators.read().clone();

        let mut fresh = Vec::new();
        for state in states.iter().filter(|s| s.enabled) {
            let Some(indicator) = self.registry.get(&state.id) else {
                continue;
            };
            match indicator.compute_json(&candles, &state.config) {
                Ok(render) => fresh.push(IndicatorOutput {
                    id: state.id.clone(),
                    render,
                }),
                Err(e) => warn!(indicator = %state.id, error = %e, "indicator skipped"),
            }
        }

        data.outputs = fresh;
        self.increment_version();
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub fn set_loading(&self, loading: bool) {
        let mut current = self.loading.write();
        if *current != loading {
            *current = loading;
            drop(current);
            self.increment_version();
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.read()
    }

    /// Record (or clear, with `None`) the error shown to the consumer.
    pub fn set_error(&self, message: Option<String>) {
        let record = message.map(|message| ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        });
        *self.last_error.write() = record;
        self.increment_version();
    }

    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.last_error.read().clone()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let mut current = self.connection.write();
        if *current != state {
            *current = state;
            drop(current);
            self.increment_version();
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Everything a chart consumer needs to draw, as sent by `GET /chart` and
    /// the WebSocket feed.
    pub fn snapshot(&self) -> ChartSnapshot {
        let indicators = self.indicator_summaries();
        let is_loading = self.is_loading();
        let error = self.last_error();
        let connection = self.connection_state();

        let data = self.data.read();
        ChartSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            symbol: data.selection.symbol.clone(),
            interval: data.selection.interval,
            candles: data.window.to_vec(),
            indicators,
            outputs: data.outputs.clone(),
            is_loading,
            error,
            connection,
        }
    }
}

/// Trim and upper-case a symbol, rejecting anything but ASCII letters and
/// digits.
pub fn normalize_symbol(raw: &str) -> Result<String, ChartError> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ChartError::InvalidSymbol(symbol));
    }
    Ok(symbol)
}

impl std::fmt::Debug for ChartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("ChartState")
            .field("version", &self.current_state_version())
            .field("selection", &data.selection)
            .field("candles", &data.window.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub symbol: String,
    pub interval: Interval,
    pub candles: Vec<Candle>,
    pub indicators: Vec<IndicatorSummary>,
    pub outputs: Vec<IndicatorOutput>,
    pub is_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub connection: ConnectionState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSummary {
    pub id: String,
    pub label: String,
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn btc() -> MarketSelection {
        MarketSelection {
            symbol: "BTCUSDT".into(),
            interval: Interval::OneHour,
        }
    }

    fn state() -> ChartState {
        let state = ChartState::new(Arc::new(IndicatorRegistry::with_builtin()), btc(), 100);
        state.register_all();
        state
    }

    fn history(n: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 / 3.0).sin() * 5.0;
                Candle::new(i * 3_600_000, c, c + 1.0, c - 1.0, c, 1.0)
            })
            .collect()
    }

    #[test]
    fn register_is_idempotent_and_starts_disabled() {
        let state = state();
        let states = state.indicator_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].id, "emaCross");
        assert!(!states[0].enabled);
        assert_eq!(states[0].config["emaFast"], 33);

        assert!(!state.register_indicator("emaCross", None).unwrap());
        assert!(matches!(
            state.register_indicator("nope", None),
            Err(ChartError::UnknownIndicator(_))
        ));
    }

    #[test]
    fn enabling_computes_outputs() {
        let state = state();
        state.replace_history(&btc(), history(50));
        assert!(state.outputs().is_empty());

        state.set_indicator_enabled("emaCross", true).unwrap();
        let outputs = state.outputs();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].render.overlays.len(), 5);
        assert_eq!(outputs[0].render.overlays[0].data.len(), 50);

        state.set_indicator_enabled("emaCross", false).unwrap();
        assert!(state.outputs().is_empty());
        assert!(state.set_indicator_enabled("nope", true).is_err());
    }

    #[test]
    fn updates_recompute_outputs() {
        let state = state();
        state.set_indicator_enabled("emaCross", true).unwrap();
        state.replace_history(&btc(), history(10));

        let last = *state.candles().last().unwrap();
        let outcome = state
            .apply_update(
                &btc(),
                &KlineUpdate {
                    candle: Candle::new(last.open_time + 3_600_000, 1.0, 1.0, 1.0, 1.0, 1.0),
                    is_final: false,
                },
            )
            .unwrap();
        assert_eq!(outcome.kind, crate::market_data::MergeKind::Appended);

        let output = state.output("emaCross").unwrap();
        assert_eq!(output.render.overlays[0].data.len(), 11);
    }

    #[test]
    fn config_is_validated_and_normalised() {
        let state = state();
        let config = state
            .set_indicator_config("emaCross", &json!({ "emaFast": 5, "bogus": true }))
            .unwrap();
        assert_eq!(config["emaFast"], 5);
        assert_eq!(config["trendSlow"], 200);
        assert!(config.get("bogus").is_none());
        assert_eq!(state.indicator_states()[0].config, config);

        let err = state
            .set_indicator_config("emaCross", &json!({ "emaSlow": 0 }))
            .unwrap_err();
        assert!(matches!(err, ChartError::Config(_)));
        assert_eq!(state.indicator_states()[0].config["emaFast"], 5);

        assert!(matches!(
            state.set_indicator_config("nope", &json!({})),
            Err(ChartError::UnknownIndicator(_))
        ));
    }

    #[test]
    fn mutations_bump_version() {
        let state = state();
        let v0 = state.current_state_version();
        state.replace_history(&btc(), history(3));
        let v1 = state.current_state_version();
        assert!(v1 > v0);

        state.set_connection_state(ConnectionState::Connected);
        let v2 = state.current_state_version();
        assert!(v2 > v1);
        state.set_connection_state(ConnectionState::Connected);
        assert_eq!(state.current_state_version(), v2);
    }

    #[test]
    fn select_market_clears_window_and_notifies() {
        let state = state();
        state.replace_history(&btc(), history(5));
        let mut rx = state.subscribe_selection();

        assert!(!state.select_market("btcusdt", Interval::OneHour).unwrap());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(state.candles().len(), 5);

        assert!(state.select_market(" ethusdt ", Interval::FiveMinutes).unwrap());
        assert!(rx.has_changed().unwrap());
        let selection = rx.borrow_and_update().clone();
        assert_eq!(selection.symbol, "ETHUSDT");
        assert_eq!(selection.interval, Interval::FiveMinutes);
        assert!(state.candles().is_empty());

        assert!(matches!(
            state.select_market("  ", Interval::OneMinute),
            Err(ChartError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn data_for_a_previous_market_is_dropped() {
        let state = state();
        state.set_indicator_enabled("emaCross", true).unwrap();
        state.select_market("ETHUSDT", Interval::OneHour).unwrap();
        let version = state.current_state_version();

        assert!(!state.replace_history(&btc(), history(5)));
        let update = KlineUpdate {
            candle: Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0),
            is_final: true,
        };
        assert!(state.apply_update(&btc(), &update).is_none());
        assert!(state.candles().is_empty());
        assert!(state.outputs().is_empty());
        assert_eq!(state.current_state_version(), version);

        let eth = state.selection();
        assert!(state.replace_history(&eth, history(5)));
        assert!(state.apply_update(&eth, &update).is_some());
        assert_eq!(state.candles().len(), 5);
        assert_eq!(state.output("emaCross").unwrap().render.overlays[0].data.len(), 5);
    }

    #[test]
    fn snapshots_stay_aligned_under_concurrent_updates() {
        let state = Arc::new(state());
        state.set_indicator_enabled("emaCross", true).unwrap();
        state.replace_history(&btc(), history(20));

        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                for i in 20..1_500_i64 {
                    let c = 100.0 + (i as f64 / 7.0).cos();
                    let update = KlineUpdate {
                        candle: Candle::new(i * 3_600_000, c, c + 1.0, c - 1.0, c, 1.0),
                        is_final: true,
                    };
                    state.apply_update(&btc(), &update).unwrap();
                }
            })
        };

        let mut checked = 0;
        while !writer.is_finished() || checked == 0 {
            let snap = state.snapshot();
            let last_t = snap.candles.last().map(|c| c.open_time);
            for overlay in &snap.outputs[0].render.overlays {
                assert_eq!(overlay.data.len(), snap.candles.len());
                assert_eq!(overlay.data.last().map(|p| p.t), last_t);
            }
            checked += 1;
        }
        writer.join().unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.candles.len(), 100);
        assert_eq!(snap.outputs[0].render.overlays[0].data.len(), 100);
    }

    #[test]
    fn snapshot_shape() {
        let state = state();
        state.set_indicator_enabled("emaCross", true).unwrap();
        state.replace_history(&btc(), history(4));
        state.set_error(Some("boom".into()));

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["interval"], "1h");
        assert_eq!(json["candles"].as_array().unwrap().len(), 4);
        assert_eq!(json["candles"][0]["t"], 0);
        assert_eq!(json["indicators"][0]["label"], "EMA Cross Scanner");
        assert_eq!(json["outputs"][0]["id"], "emaCross");
        assert_eq!(json["outputs"][0]["overlays"].as_array().unwrap().len(), 5);
        assert_eq!(json["error"]["message"], "boom");
        assert_eq!(json["connection"], "disconnected");
        assert_eq!(json["isLoading"], false);

        state.set_error(None);
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert!(json.get("error").is_none());
    }
}
