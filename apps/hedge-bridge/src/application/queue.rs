//! Trade Queue
//!
//! Bounded FIFO of outbound events to the executor. Producers (trade
//! submission, close orchestration, elastic enrichment) enqueue
//! non-blockingly; the per-stream forwarding loops drain non-blockingly.
//! The bound keeps memory flat when the executor stream disconnects and
//! turns backpressure into visible `QueueFull` errors instead of silent
//! accumulation.

use std::collections::VecDeque;

use parking_lot::Mutex;
use thiserror::Error;

use crate::domain::trade::Trade;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Admission was rejected because the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("trade queue is full")]
pub struct QueueFull;

/// Bounded FIFO of outbound trade events.
#[derive(Debug)]
pub struct TradeQueue {
    inner: Mutex<VecDeque<Trade>>,
    capacity: usize,
}

impl TradeQueue {
    /// Create a queue with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Create a queue with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    /// Append a trade. Fails immediately when the queue is full; never
    /// blocks the producer.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the queue is at capacity.
    pub fn enqueue(&self, trade: Trade) -> Result<(), QueueFull> {
        let mut inner = self.inner.lock();
        if inner.len() >= self.capacity {
            return Err(QueueFull);
        }
        inner.push_back(trade);
        Ok(())
    }

    /// Remove and return the head, or `None` immediately when empty.
    #[must_use]
    pub fn poll(&self) -> Option<Trade> {
        self.inner.lock().pop_front()
    }

    /// Number of queued trades.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no trades are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for TradeQueue {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// Tests
// =============================================================================
