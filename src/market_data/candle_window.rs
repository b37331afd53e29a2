use std::collections::VecDeque;

use crate::types::Candle;

/// Default number of candles kept in a window.
pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// CandleWindow -- ordered rolling window of candles
// ---------------------------------------------------------------------------

/// What a single [`CandleWindow::merge`] did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub kind: MergeKind,
    /// Number of oldest candles dropped to stay within capacity.
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// A candle with the same open time was overwritten in place.
    Replaced,
    /// The candle was added at the tail.
    Appended,
    /// The candle was older than the tail and inserted at its sorted slot.
    Inserted,
}

/// Rolling window of candles, strictly ascending by `open_time` and never
/// longer than `capacity`.
///
/// The in-progress candle is updated in place until its bucket closes; the
/// next bucket is appended and the oldest candle is evicted on overflow.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    /// Create an empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Merge a live update into the window.
    ///
    /// * same `open_time` as an existing candle: replace it in place.
    /// * newer than the tail: append.
    /// * older than the tail but absent: insert at its sorted position.
    ///
    /// The head is then trimmed back to `capacity`.
    pub fn merge(&mut self, incoming: Candle) -> MergeOutcome {
        let kind = match self.candles.back() {
            None => {
                self.candles.push_back(incoming);
                MergeKind::Appended
            }
            Some(last) if last.open_time < incoming.open_time => {
                self.candles.push_back(incoming);
                MergeKind::Appended
            }
            Some(last) if last.open_time == incoming.open_time => {
                if let Some(slot) = self.candles.back_mut() {
                    *slot = incoming;
                }
                MergeKind::Replaced
            }
            Some(_) => match self
                .candles
                .binary_search_by_key(&incoming.open_time, |c| c.open_time)
            {
                Ok(idx) => {
                    self.candles[idx] = incoming;
                    MergeKind::Replaced
                }
                Err(idx) => {
                    self.candles.insert(idx, incoming);
                    MergeKind::Inserted
                }
            },
        };

        let evicted = self.trim();
        MergeOutcome { kind, evicted }
    }

    /// Replace the whole window with a freshly fetched history batch, keeping
    /// the newest `capacity` candles.
    pub fn replace_all(&mut self, history: Vec<Candle>) {
        self.candles = history.into();
        self.trim();
    }

    /// Drop every candle.
    pub fn clear(&mut self) {
        self.candles.clear();
    }

    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// Contiguous oldest-first copy, suitable for indicator computation.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

impl Default for CandleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
