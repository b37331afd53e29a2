// =============================================================================
// Chart Pipeline — history load, live merge and selection switching
// =============================================================================
//
// One long-running task per chart:
//
//   loop per selection:
//     1. loading = true, fetch history (retry after a fixed delay on failure)
//     2. replace the window, loading = false
//     3. subscribe to live updates and merge each into the window
//     4. mirror the subscription's connection state into chart state
//     5. on selection change: unsubscribe and start over
//
// A stream that gave up reconnecting leaves the chart on its last candles
// until the selection changes.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chart_state::{ChartState, MarketSelection};
use crate::market_data::{ConnectionState, MarketDataAdapter};

/// Why a single-selection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    SelectionChanged,
    Cancelled,
}

pub struct ChartPipeline {
    adapter: Arc<dyn MarketDataAdapter>,
    state: Arc<ChartState>,
    history_limit: u32,
    history_retry: Duration,
}

impl ChartPipeline {
    pub fn new(
        adapter: Arc<dyn MarketDataAdapter>,
        state: Arc<ChartState>,
        history_limit: u32,
        history_retry: Duration,
    ) -> Self {
        Self {
            adapter,
            state,
            history_limit,
            history_retry,
        }
    }

    /// Drive the chart until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut selection_rx = self.state.subscribe_selection();

        loop {
            let selection = selection_rx.borrow_and_update().clone();
            info!(
                symbol = %selection.symbol,
                interval = %selection.interval,
                "chart pipeline loading market"
            );

            match self.run_selection(&selection, &mut selection_rx, &cancel).await {
                Flow::SelectionChanged => continue,
                Flow::Cancelled => break,
            }
        }

        self.state.set_loading(false);
        self.state.set_connection_state(ConnectionState::Disconnected);
        info!("chart pipeline stopped");
    }

    async fn run_selection(
        &self,
        selection: &MarketSelection,
        selection_rx: &mut watch::Receiver<MarketSelection>,
        cancel: &CancellationToken,
    ) -> Flow {
        if let Some(flow) = self.load_history(selection, selection_rx, cancel).await {
            return flow;
        }

        let mut subscription = self
            .adapter
            .subscribe_realtime(&selection.symbol, selection.interval);
        let mut connection = subscription.state_watch();
        let mut streaming = true;
        let mut watching = true;

        let flow = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Flow::Cancelled,
                changed = selection_rx.changed() => break selection_flow(changed),
                changed = connection.changed(), if watching => {
                    match changed {
                        Ok(()) => {
                            let conn_state = *connection.borrow_and_update();
                            self.state.set_connection_state(conn_state);
                        }
                        Err(_) => watching = false,
                    }
                }
                update = subscription.recv(), if streaming => {
                    match update {
                        Some(update) => {
                            // A mismatch means the selection just changed;
                            // the next turn of the loop picks that up.
                            self.state.apply_update(selection, &update);
                        }
                        None => {
                            streaming = false;
                            let final_state = subscription.state();
                            self.state.set_connection_state(final_state);
                            if final_state == ConnectionState::Exhausted {
                                error!(
                                    stream = %subscription.stream_key(),
                                    "live updates stopped after reconnect attempts ran out"
                                );
                                self.state.set_error(Some(
                                    "live updates unavailable: reconnect attempts exhausted"
                                        .to_string(),
                                ));
                            }
                        }
                    }
                }
            }
        };

        subscription.unsubscribe();
        self.state.set_connection_state(ConnectionState::Disconnected);
        flow
    }

    /// Fetch history until it succeeds. Returns `Some(flow)` if the run was
    /// interrupted before that.
    async fn load_history(
        &self,
        selection: &MarketSelection,
        selection_rx: &mut watch::Receiver<MarketSelection>,
        cancel: &CancellationToken,
    ) -> Option<Flow> {
        loop {
            self.state.set_loading(true);

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some(Flow::Cancelled),
                changed = selection_rx.changed() => return Some(selection_flow(changed)),
                fetched = self.adapter.fetch_history(
                    &selection.symbol,
                    selection.interval,
                    self.history_limit,
                ) => fetched,
            };

            match fetched {
                Ok(history) => {
                    let count = history.len();
                    if !self.state.replace_history(selection, history) {
                        info!(
                            symbol = %selection.symbol,
                            "market changed while history was loading"
                        );
                        return Some(Flow::SelectionChanged);
                    }
                    info!(
                        symbol = %selection.symbol,
                        interval = %selection.interval,
                        candles = count,
                        "history loaded"
                    );
                    if self.state.last_error().is_some() {
                        self.state.set_error(None);
                    }
                    self.state.set_loading(false);
                    return None;
                }
                Err(e) => {
                    warn!(
                        symbol = %selection.symbol,
                        error = %e,
                        retry_in_s = self.history_retry.as_secs_f64(),
                        "history fetch failed"
                    );
                    self.state.set_error(Some(e.to_string()));
                    self.state.set_loading(false);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Some(Flow::Cancelled),
                        changed = selection_rx.changed() => return Some(selection_flow(changed)),
                        _ = tokio::time::sleep(self.history_retry) => {}
                    }
                }
            }
        }
    }
}

fn selection_flow(changed: Result<(), watch::error::RecvError>) -> Flow {
    match changed {
        Ok(()) => Flow::SelectionChanged,
        Err(_) => Flow::Cancelled,
    }
}
