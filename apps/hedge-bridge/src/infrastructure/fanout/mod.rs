//! Stream Fanout
//!
//! Maintains the two outbound stream populations and moves events to them
//! with non-blocking semantics:
//!
//! - **Downstream** (executor-facing) streams receive every outbound trade
//!   event drained from the trade queue.
//! - **Upstream** (platform-facing) streams receive only executor close
//!   notifications, never the outbound trade queue, so closes cannot echo
//!   back as new trades.
//!
//! Each stream owns a bounded channel; a full channel drops the event with a
//! warning rather than blocking the producer. One forwarding loop runs per
//! downstream stream, ticking every 25 ms and draining the queue completely
//! per tick. A stale-close gate drops CLOSE_HEDGE events whose ticket the
//! executor already confirmed closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CloseNotifier;
use crate::application::queue::TradeQueue;
use crate::application::status::BridgeStatus;
use crate::domain::correlation::{CorrelationStore, RECENTLY_CLOSED_TTL};
use crate::domain::trade::{Trade, TradeAction};

// =============================================================================
// Configuration
// =============================================================================

/// Per-stream channel capacity.
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Forwarding loop tick.
pub const FORWARD_TICK: Duration = Duration::from_millis(25);

/// Idle-queue monitor tick.
pub const IDLE_MONITOR_TICK: Duration = Duration::from_secs(2);

// =============================================================================
// Stream Registry
// =============================================================================

/// Which population a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Executor-facing; consumes the trade queue.
    Downstream,
    /// Platform-facing; receives close notifications only.
    Upstream,
}

impl StreamKind {
    const fn label(self) -> &'static str {
        match self {
            Self::Downstream => "downstream",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Debug)]
struct StreamEntry {
    kind: StreamKind,
    tx: mpsc::Sender<Trade>,
}

/// Registry of connected streams plus the forwarding machinery.
pub struct FanoutHub {
    streams: RwLock<HashMap<String, StreamEntry>>,
    queue: Arc<TradeQueue>,
    store: Arc<CorrelationStore>,
    status: Arc<BridgeStatus>,
    next_stream: AtomicU64,
}

/// Shared fanout hub reference.
pub type SharedFanoutHub = Arc<FanoutHub>;

impl FanoutHub {
    /// Create a hub over the shared core state.
    #[must_use]
    pub fn new(
        queue: Arc<TradeQueue>,
        store: Arc<CorrelationStore>,
        status: Arc<BridgeStatus>,
    ) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            queue,
            store,
            status,
            next_stream: AtomicU64::new(1),
        }
    }

    /// Register a stream and hand back its id and event receiver.
    ///
    /// Registering a downstream stream marks the executor active.
    pub fn register(&self, kind: StreamKind) -> (String, mpsc::Receiver<Trade>) {
        let seq = self.next_stream.fetch_add(1, Ordering::Relaxed);
        let stream_id = format!("{}_stream_{seq}", kind.label());
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        self.streams
            .write()
            .insert(stream_id.clone(), StreamEntry { kind, tx });

        if kind == StreamKind::Downstream {
            self.status.set_hedgebot_active(true);
        }
        tracing::info!(stream_id = %stream_id, kind = kind.label(), "stream connected");
        (stream_id, rx)
    }

    /// Remove a stream. Removing the last downstream stream flips the
    /// executor-active flag off.
    pub fn remove(&self, stream_id: &str) {
        let removed_kind = {
            let mut streams = self.streams.write();
            let removed = streams.remove(stream_id).map(|entry| entry.kind);
            if removed == Some(StreamKind::Downstream)
                && !streams
                    .values()
                    .any(|entry| entry.kind == StreamKind::Downstream)
            {
                self.status.set_hedgebot_active(false);
            }
            removed
        };
        if let Some(kind) = removed_kind {
            tracing::info!(stream_id, kind = kind.label(), "stream disconnected");
        }
    }

    /// Whether the stream is still registered.
    #[must_use]
    pub fn contains(&self, stream_id: &str) -> bool {
        self.streams.read().contains_key(stream_id)
    }

    /// Number of connected downstream streams.
    #[must_use]
    pub fn downstream_count(&self) -> usize {
        self.count(StreamKind::Downstream)
    }

    /// Number of connected upstream streams.
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.count(StreamKind::Upstream)
    }

    fn count(&self, kind: StreamKind) -> usize {
        self.streams
            .read()
            .values()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Stale-close gate: true when the trade is a CLOSE_HEDGE for a ticket
    /// the executor already confirmed closed.
    #[must_use]
    pub fn is_stale_close(&self, trade: &Trade) -> bool {
        trade.action == TradeAction::CloseHedge
            && trade.mt5_ticket != 0
            && self
                .store
                .was_ticket_recently_closed(trade.mt5_ticket, RECENTLY_CLOSED_TTL)
    }

    // =========================================================================
    // Forwarding
    // =========================================================================

    /// Drive one downstream stream: tick at 25 ms and drain the trade queue
    /// completely per tick, stopping when the stream is unregistered.
    ///
    /// A full stream channel drops the trade with a warning; the queue has
    /// already admitted it, so dropping here is the only option short of
    /// blocking the loop.
    pub async fn run_forwarding_loop(self: Arc<Self>, stream_id: String) {
        tracing::debug!(stream_id = %stream_id, "forwarding loop started");
        let mut tick = tokio::time::interval(FORWARD_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            let Some(tx) = self.sender_for(&stream_id) else {
                tracing::debug!(stream_id = %stream_id, "stream gone; forwarding loop stopped");
                return;
            };

            while let Some(trade) = self.queue.poll() {
                if self.is_stale_close(&trade) {
                    tracing::info!(
                        stream_id = %stream_id,
                        trade_id = %trade.id,
                        mt5_ticket = trade.mt5_ticket,
                        "dropping stale CLOSE_HEDGE for recently-closed ticket"
                    );
                    metrics::counter!("bridge_stale_closes_dropped_total").increment(1);
                    continue;
                }

                match tx.try_send(trade) {
                    Ok(()) => {
                        metrics::counter!("bridge_trades_forwarded_total").increment(1);
                    }
                    Err(mpsc::error::TrySendError::Full(trade)) => {
                        tracing::warn!(
                            stream_id = %stream_id,
                            trade_id = %trade.id,
                            "stream buffer full; dropping trade"
                        );
                        metrics::counter!("bridge_stream_drops_total").increment(1);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(stream_id = %stream_id, "stream receiver closed");
                        self.remove(&stream_id);
                        return;
                    }
                }
            }

            metrics::gauge!("bridge_queue_depth").set(self.queue.len() as f64);
        }
    }

    fn sender_for(&self, stream_id: &str) -> Option<mpsc::Sender<Trade>> {
        self.streams
            .read()
            .get(stream_id)
            .map(|entry| entry.tx.clone())
    }

    /// Warn periodically when trades buffer with no executor stream to
    /// drain them. Runs until cancelled.
    pub async fn run_idle_queue_monitor(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(IDLE_MONITOR_TICK);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = tick.tick() => {}
            }
            if self.downstream_count() > 0 {
                continue;
            }
            let queued = self.queue.len();
            if queued > 0 {
                tracing::warn!(
                    queued,
                    "trades buffered with no active executor stream; will flush on reconnect"
                );
            }
        }
    }
}

impl CloseNotifier for FanoutHub {
    /// Fan a close notification out to upstream streams only. Downstream
    /// streams are skipped so closes cannot loop back to the executor.
    fn notify_upstream(&self, trade: Trade) {
        let streams = self.streams.read();
        for (stream_id, entry) in streams.iter() {
            if entry.kind != StreamKind::Upstream {
                continue;
            }
            match entry.tx.try_send(trade.clone()) {
                Ok(()) => {
                    metrics::counter!("bridge_close_notifications_total").increment(1);
                    tracing::debug!(
                        stream_id = %stream_id,
                        trade_id = %trade.id,
                        "close notification sent to upstream stream"
                    );
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        stream_id = %stream_id,
                        trade_id = %trade.id,
                        "upstream stream buffer full; skipping close notification"
                    );
                    metrics::counter!("bridge_stream_drops_total").increment(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::order_type;

    struct HubFixture {
        hub: SharedFanoutHub,
        queue: Arc<TradeQueue>,
        store: Arc<CorrelationStore>,
        status: Arc<BridgeStatus>,
    }

    fn hub() -> HubFixture {
        let queue = Arc::new(TradeQueue::with_defaults());
        let store = Arc::new(CorrelationStore::new());
        let status = Arc::new(BridgeStatus::new());
        let hub = Arc::new(FanoutHub::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&status),
        ));
        HubFixture {
            hub,
            queue,
            store,
            status,
        }
    }

    #[tokio::test]
    async fn register_and_remove_track_executor_liveness() {
        let f = hub();
        assert!(!f.status.is_hedgebot_active());

        let (id1, _rx1) = f.hub.register(StreamKind::Downstream);
        let (id2, _rx2) = f.hub.register(StreamKind::Downstream);
        assert!(f.status.is_hedgebot_active());
        assert_eq!(f.hub.downstream_count(), 2);

        f.hub.remove(&id1);
        assert!(f.status.is_hedgebot_active());
        f.hub.remove(&id2);
        assert!(!f.status.is_hedgebot_active());
    }

    #[tokio::test]
    async fn upstream_streams_do_not_count_as_executor() {
        let f = hub();
        let (_id, _rx) = f.hub.register(StreamKind::Upstream);
        assert!(!f.status.is_hedgebot_active());
        assert_eq!(f.hub.upstream_count(), 1);
        assert_eq!(f.hub.downstream_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forwarding_loop_drains_queue_to_stream() {
        let f = hub();
        let (stream_id, mut rx) = f.hub.register(StreamKind::Downstream);
        tokio::spawn(Arc::clone(&f.hub).run_forwarding_loop(stream_id.clone()));

        f.queue
            .enqueue(Trade::close_hedge("B1", 101, "NQ", "Sim101"))
            .unwrap();
        f.queue
            .enqueue(Trade::close_hedge("B1", 102, "NQ", "Sim101"))
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.mt5_ticket, 101);
        assert_eq!(second.mt5_ticket, 102);

        f.hub.remove(&stream_id);
    }

    #[tokio::test(start_paused = true)]
    async fn forwarding_loop_gates_stale_closes() {
        let f = hub();
        f.store.mark_ticket_closed(606);

        let (stream_id, mut rx) = f.hub.register(StreamKind::Downstream);
        tokio::spawn(Arc::clone(&f.hub).run_forwarding_loop(stream_id.clone()));

        f.queue
            .enqueue(Trade::close_hedge("B6", 606, "NQ", "Sim101"))
            .unwrap();
        f.queue
            .enqueue(Trade::close_hedge("B6", 607, "NQ", "Sim101"))
            .unwrap();

        // Only the non-stale close arrives.
        let got = rx.recv().await.unwrap();
        assert_eq!(got.mt5_ticket, 607);

        f.hub.remove(&stream_id);
    }

    #[tokio::test]
    async fn close_notifications_reach_upstream_only() {
        let f = hub();
        let (_up_id, mut up_rx) = f.hub.register(StreamKind::Upstream);
        let (_down_id, mut down_rx) = f.hub.register(StreamKind::Downstream);

        let notification = Trade::close_notification(
            "mt5close_1".to_string(),
            "B1",
            101,
            1.0,
            order_type::MT5_CLOSE,
            "MT5_position_closed",
            "NQ",
            "Sim101",
        );
        f.hub.notify_upstream(notification);

        let got = up_rx.try_recv().unwrap();
        assert_eq!(got.mt5_ticket, 101);
        assert!(down_rx.try_recv().is_err());
    }
}
