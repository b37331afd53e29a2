// =============================================================================
// Streaming subscription — cancellable kline stream with auto-reconnect
// =============================================================================
//
// One spawned task per subscription owns the connection and the backoff state
// and forwards parsed updates over a bounded channel. The consumer holds a
// `Subscription`; cancelling it (explicitly or by dropping it) is the only way
// to stop the task. Cancellation is raced against every await point in the
// task, so a reconnect that was scheduled before the cancel never fires.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::FrameError;
use crate::market_data::reconnect::{Backoff, ConnectionState, ReconnectPolicy};
use crate::types::KlineUpdate;

/// Capacity of the update channel between the stream task and the consumer.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Raw text frames of one open connection. The stream ending means the
/// connection closed.
pub type FrameStream = BoxStream<'static, anyhow::Result<String>>;

/// Turns one text frame into a candle update.
pub type FrameParser = fn(&str) -> Result<KlineUpdate, FrameError>;

/// Something that can open a kline connection for a stream key.
#[async_trait]
pub trait KlineTransport: Send + Sync + 'static {
    async fn connect(&self, stream_key: &str) -> anyhow::Result<FrameStream>;
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Consumer side of a live kline stream.
///
/// Updates arrive in transport order. Once [`Subscription::cancel`] has
/// returned, [`Subscription::recv`] yields `None` forever.
pub struct Subscription {
    stream_key: String,
    updates: mpsc::Receiver<KlineUpdate>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Spawn the stream task on the current tokio runtime.
    pub fn spawn(
        transport: Arc<dyn KlineTransport>,
        stream_key: impl Into<String>,
        policy: ReconnectPolicy,
        parser: FrameParser,
    ) -> Self {
        let stream_key = stream_key.into();
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let task = StreamTask {
            transport,
            stream_key: stream_key.clone(),
            policy,
            parser,
            updates: update_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        info!(stream = %stream_key, "kline subscription started");

        Self {
            stream_key,
            updates: update_rx,
            state: state_rx,
            cancel,
            task: Some(handle),
        }
    }

    /// Next update, or `None` once the subscription is cancelled or the stream
    /// task has stopped for good.
    pub async fn recv(&mut self) -> Option<KlineUpdate> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            update = self.updates.recv() => update,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch handle for connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the stream: closes the connection, cancels any pending reconnect
    /// and suppresses every further update.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(stream = %self.stream_key, "kline subscription cancelled");
        }
        self.cancel.cancel();
    }

    /// Cancel and release the handle.
    pub fn unsubscribe(self) {
        self.cancel();
    }

    /// Cancel and wait for the stream task to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(stream = %self.stream_key, error = %e, "kline stream task panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream_key", &self.stream_key)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Stream task
// ---------------------------------------------------------------------------

enum PumpExit {
    /// Connection lost (close, error or end of stream).
    Lost,
    /// Subscription cancelled or consumer dropped.
    Stop,
}

struct StreamTask {
    transport: Arc<dyn KlineTransport>,
    stream_key: String,
    policy: ReconnectPolicy,
    parser: FrameParser,
    updates: mpsc::Sender<KlineUpdate>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl StreamTask {
    async fn run(self) {
        let mut backoff = Backoff::new(self.policy);

        while !self.cancel.is_cancelled() {
            self.state.send_replace(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&self.stream_key) => result,
            };

            match connected {
                Ok(frames) => {
                    self.state.send_replace(ConnectionState::Connected);
                    backoff.reset();
                    info!(stream = %self.stream_key, "kline stream connected");

                    if let PumpExit::Stop = self.pump(frames).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(stream = %self.stream_key, error = %e, "kline stream connect failed");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.state.send_replace(ConnectionState::Disconnected);

            let Some(delay) = backoff.next_delay() else {
                error!(
                    stream = %self.stream_key,
                    attempts = backoff.attempts(),
                    "max reconnect attempts reached -- stream stays down"
                );
                self.state.send_replace(ConnectionState::Exhausted);
                return;
            };

            info!(
                stream = %self.stream_key,
                delay_ms = delay.as_millis() as u64,
                attempt = backoff.attempts(),
                "scheduling kline stream reconnect"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!(stream = %self.stream_key, "kline stream task stopped");
    }

    /// Forward frames of one connection until it drops or we are cancelled.
    async fn pump(&self, mut frames: FrameStream) -> PumpExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpExit::Stop,
                frame = frames.next() => frame,
            };

            match next {
                Some(Ok(text)) => match (self.parser)(&text) {
                    Ok(update) => {
                        debug!(
                            stream = %self.stream_key,
                            open_time = update.candle.open_time,
                            close = update.candle.close,
                            is_final = update.is_final,
                            "candle update"
                        );
                        let sent = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return PumpExit::Stop,
                            sent = self.updates.send(update) => sent,
                        };
                        if sent.is_err() {
                            debug!(stream = %self.stream_key, "consumer dropped -- stopping stream");
                            return PumpExit::Stop;
                        }
                    }
                    Err(e) => {
                        warn!(stream = %self.stream_key, error = %e, "dropping malformed kline frame");
                    }
                },
                Some(Err(e)) => {
                    warn!(stream = %self.stream_key, error = %e, "kline stream read error");
                    return PumpExit::Lost;
                }
                None => {
                    warn!(stream = %self.stream_key, "kline stream closed by remote");
                    return PumpExit::Lost;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
