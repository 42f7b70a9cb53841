//! Result Ingestion
//!
//! Consumes executor-originated events: fill/close results, spontaneous
//! hedge-close notifications, and elastic profit updates. Updates the
//! correlation store, classifies close results against the elastic-context
//! window, and emits enriched notifications to upstream streams.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::error::BridgeError;
use crate::application::ports::CloseNotifier;
use crate::application::queue::TradeQueue;
use crate::application::status::BridgeStatus;
use crate::domain::correlation::{CorrelationStore, ELASTIC_MARK_TTL};
use crate::domain::trade::{
    is_elastic_reason, order_type, Ticket, Trade, DEFAULT_CLOSURE_REASON, ELASTIC_PARTIAL_CLOSE,
};

/// How long to wait for a concurrently-arriving entry to land an elastic
/// hint before enqueueing an unenriched event.
const HINT_WAIT: Duration = Duration::from_millis(150);
const HINT_POLL_INTERVAL: Duration = Duration::from_millis(15);

// =============================================================================
// Typed Events
// =============================================================================

/// Executor fill or close result.
#[derive(Debug, Clone, Default)]
pub struct TradeResult {
    /// Executor status string; doubles as the closure reason on closes.
    pub status: String,
    /// Executor position ticket.
    pub ticket: Ticket,
    /// Filled or closed volume.
    pub volume: f64,
    /// Whether this result reports a close rather than a fill.
    pub is_close: bool,
    /// Correlation key the result belongs to.
    pub base_id: String,
}

/// Executor-initiated hedge close notification.
#[derive(Debug, Clone, Default)]
pub struct HedgeClose {
    /// Correlation key of the closed position.
    pub base_id: String,
    /// Instrument symbol, if the executor included it.
    pub instrument: String,
    /// Account name, if the executor included it.
    pub account: String,
    /// Closed quantity.
    pub quantity: f64,
    /// Why the executor closed (`MT5_*` or `elastic_*`).
    pub closure_reason: String,
    /// Executor ticket; zero when omitted.
    pub ticket: Ticket,
}

/// Executor elastic profit update.
#[derive(Debug, Clone, Default)]
pub struct ElasticUpdate {
    /// Correlation key of the position being resized.
    pub base_id: String,
    /// Current profit of the hedge.
    pub current_profit: f64,
    /// Profit level the update reports.
    pub profit_level: i32,
    /// Executor ticket; zero when omitted.
    pub ticket: Ticket,
}

// =============================================================================
// Ingestor
// =============================================================================

/// Applies executor events to the correlation store and fans notifications
/// out to upstream streams.
pub struct ResultIngestor {
    store: Arc<CorrelationStore>,
    queue: Arc<TradeQueue>,
    status: Arc<BridgeStatus>,
    notifier: Arc<dyn CloseNotifier>,
}

impl ResultIngestor {
    /// Create an ingestor over the shared core state.
    #[must_use]
    pub fn new(
        store: Arc<CorrelationStore>,
        queue: Arc<TradeQueue>,
        status: Arc<BridgeStatus>,
        notifier: Arc<dyn CloseNotifier>,
    ) -> Self {
        Self {
            store,
            queue,
            status,
            notifier,
        }
    }

    // =========================================================================
    // Fill / close results
    // =========================================================================

    /// Ingest an executor trade result.
    pub fn ingest_trade_result(&self, result: &TradeResult) {
        let base_id = result.base_id.trim();
        if base_id.is_empty() || result.ticket == 0 {
            tracing::warn!(
                base_id,
                mt5_ticket = result.ticket,
                is_close = result.is_close,
                "discarding trade result without base_id and ticket"
            );
            return;
        }

        if result.is_close {
            self.ingest_close_result(base_id, result);
        } else {
            self.ingest_open_result(base_id, result);
        }
    }

    fn ingest_open_result(&self, base_id: &str, result: &TradeResult) {
        if let Some(previous) = self.store.record_open(base_id, result.ticket) {
            tracing::warn!(
                base_id,
                previous_base_id = %previous,
                mt5_ticket = result.ticket,
                "ticket reassigned to a different base_id"
            );
        }
        self.status.record_hedge_opened();
        tracing::info!(
            base_id,
            mt5_ticket = result.ticket,
            open = self.store.open_ticket_count(base_id),
            "recorded executor fill"
        );
    }

    fn ingest_close_result(&self, base_id: &str, result: &TradeResult) {
        let mut closure_reason = if result.status.trim().is_empty() {
            DEFAULT_CLOSURE_REASON.to_string()
        } else {
            result.status.trim().to_string()
        };

        // A recent elastic marker reinterprets the generic close: partials
        // suppress the broadcast and keep the ticket open, completions carry
        // the elastic reason through.
        let mut suppress_broadcast = false;
        let mut partial = false;
        if let Some(mark) = self
            .store
            .recent_elastic(base_id, result.ticket, ELASTIC_MARK_TTL)
        {
            closure_reason = mark.reason.clone();
            if mark.reason.eq_ignore_ascii_case(ELASTIC_PARTIAL_CLOSE) {
                suppress_broadcast = true;
                partial = true;
                tracing::info!(
                    base_id,
                    mt5_ticket = result.ticket,
                    "suppressing generic close result within elastic partial-close window"
                );
            } else {
                tracing::info!(
                    base_id,
                    mt5_ticket = result.ticket,
                    closure_reason = %mark.reason,
                    "reclassifying generic close result from elastic context"
                );
            }
        }

        let order_type_tag = if self.store.consume_client_initiated(result.ticket) {
            order_type::NT_CLOSE_ACK
        } else {
            order_type::MT5_CLOSE
        };

        if !partial && result.ticket != 0 {
            self.store.prune_closed_ticket(base_id, result.ticket);
            self.status.record_hedge_closed();
        }

        if suppress_broadcast {
            return;
        }

        let (instrument, account) = self.store.metadata(base_id);
        let quantity = if result.volume > 0.0 { result.volume } else { 1.0 };
        let notification = Trade::close_notification(
            format!("mt5close_result_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            base_id,
            result.ticket,
            quantity,
            order_type_tag,
            &closure_reason,
            &instrument,
            &account,
        );
        tracing::info!(
            base_id,
            mt5_ticket = result.ticket,
            order_type = order_type_tag,
            closure_reason = %closure_reason,
            "broadcasting executor close to upstream streams"
        );
        self.notifier.notify_upstream(notification);
    }

    // =========================================================================
    // Executor-initiated close notifications
    // =========================================================================

    /// Ingest a hedge close notification sent by the executor.
    ///
    /// All `MT5_*` and `elastic_*` prefixed reasons are treated as
    /// executor-originated; anything else is ignored here (platform-
    /// originated closes arrive through the close orchestrator instead).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidInput`] when the BaseID is empty.
    pub fn ingest_hedge_close(&self, notification: &HedgeClose) -> Result<(), BridgeError> {
        let base_id = notification.base_id.trim();
        if base_id.is_empty() {
            return Err(BridgeError::InvalidInput(
                "hedge close notification missing base_id".to_string(),
            ));
        }

        let closure_reason = if notification.closure_reason.trim().is_empty() {
            DEFAULT_CLOSURE_REASON.to_string()
        } else {
            notification.closure_reason.trim().to_string()
        };

        let elastic = is_elastic_reason(&closure_reason);
        let executor_originated = elastic || closure_reason.starts_with("MT5_");
        if !executor_originated {
            tracing::info!(
                base_id,
                closure_reason = %closure_reason,
                "ignoring non-executor close notification"
            );
            return Ok(());
        }

        let partial = closure_reason.eq_ignore_ascii_case(ELASTIC_PARTIAL_CLOSE);
        let mut ticket = notification.ticket;

        if elastic {
            self.store
                .mark_elastic_close(base_id, ticket, &closure_reason, notification.quantity);
            if partial {
                // Queued close intents would otherwise fire against the
                // still-open position once fresh tickets arrive.
                let cleared = self.store.clear_pending(base_id);
                if cleared > 0 {
                    tracing::info!(
                        base_id,
                        cleared,
                        "cleared pending closes on elastic partial close"
                    );
                }
            }
        } else if ticket == 0 {
            // The executor omitted the ticket; infer the FIFO head so the
            // platform sees distinct sequential closes.
            if let Some(inferred) = self.store.pop_ticket(base_id) {
                ticket = inferred;
                tracing::debug!(
                    base_id,
                    mt5_ticket = inferred,
                    "inferred ticket for close notification from pool head"
                );
            }
        }

        let (mut instrument, mut account) = (
            notification.instrument.trim().to_string(),
            notification.account.trim().to_string(),
        );
        if instrument.is_empty() || account.is_empty() {
            let (stored_instrument, stored_account) = self.store.metadata(base_id);
            if instrument.is_empty() {
                instrument = stored_instrument;
            }
            if account.is_empty() {
                account = stored_account;
            }
        }

        let quantity = if notification.quantity > 0.0 {
            notification.quantity
        } else {
            1.0
        };
        let event = Trade::close_notification(
            format!("mt5close_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
            base_id,
            ticket,
            quantity,
            order_type::MT5_CLOSE,
            &closure_reason,
            &instrument,
            &account,
        );
        tracing::info!(
            base_id,
            mt5_ticket = ticket,
            closure_reason = %closure_reason,
            "broadcasting executor-initiated close to upstream streams"
        );
        self.notifier.notify_upstream(event);

        if !partial && ticket != 0 {
            self.store.prune_closed_ticket(base_id, ticket);
            self.status.record_hedge_closed();
        }
        Ok(())
    }

    // =========================================================================
    // Elastic updates
    // =========================================================================

    /// Turn an elastic update into an enriched EVENT trade for the executor.
    ///
    /// Waits briefly for the entry that carries the sizing hint when it has
    /// not landed yet, then enqueues regardless.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidInput`] when the BaseID is empty.
    /// - [`BridgeError::QueueFull`] when admission control rejects the event.
    pub async fn ingest_elastic_update(&self, update: &ElasticUpdate) -> Result<(), BridgeError> {
        let base_id = update.base_id.trim();
        if base_id.is_empty() {
            return Err(BridgeError::InvalidInput(
                "elastic update missing base_id".to_string(),
            ));
        }

        let mut hint = self.store.elastic_hint(base_id);
        if hint.is_none() {
            let deadline = tokio::time::Instant::now() + HINT_WAIT;
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(HINT_POLL_INTERVAL).await;
                hint = self.store.elastic_hint(base_id);
                if hint.is_some() {
                    break;
                }
            }
        }

        let points = hint.as_ref().map_or(0.0, |h| h.points_per_1k_loss);
        let (mut instrument, mut account) = hint
            .map(|h| (h.instrument, h.account))
            .unwrap_or_default();
        if instrument.is_empty() || account.is_empty() {
            let (stored_instrument, stored_account) = self.store.metadata(base_id);
            if instrument.is_empty() {
                instrument = stored_instrument;
            }
            if account.is_empty() {
                account = stored_account;
            }
        }

        let event = Trade::elastic_event(
            base_id,
            update.ticket,
            update.current_profit,
            update.profit_level,
            points,
            &instrument,
            &account,
        );
        self.queue
            .enqueue(event)
            .map_err(|_| BridgeError::QueueFull)?;

        if points <= 0.0 {
            tracing::warn!(
                base_id,
                instrument = %instrument,
                "enqueued elastic event without sizing hint; executor will fall back"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Trade>>,
    }

    impl CloseNotifier for RecordingNotifier {
        fn notify_upstream(&self, trade: Trade) {
            self.sent.lock().push(trade);
        }
    }

    struct Fixture {
        store: Arc<CorrelationStore>,
        queue: Arc<TradeQueue>,
        notifier: Arc<RecordingNotifier>,
        ingestor: ResultIngestor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(CorrelationStore::new());
        let queue = Arc::new(TradeQueue::with_defaults());
        let status = Arc::new(BridgeStatus::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let ingestor = ResultIngestor::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            status,
            Arc::clone(&notifier) as Arc<dyn CloseNotifier>,
        );
        Fixture {
            store,
            queue,
            notifier,
            ingestor,
        }
    }

    fn close_result(base_id: &str, ticket: Ticket) -> TradeResult {
        TradeResult {
            status: String::new(),
            ticket,
            volume: 1.0,
            is_close: true,
            base_id: base_id.to_string(),
        }
    }

    #[test]
    fn open_result_records_ticket() {
        let f = fixture();
        f.ingestor.ingest_trade_result(&TradeResult {
            ticket: 101,
            base_id: "B1".to_string(),
            ..TradeResult::default()
        });
        assert_eq!(f.store.pool_snapshot("B1"), vec![101]);
    }

    #[test]
    fn result_without_identity_is_discarded() {
        let f = fixture();
        f.ingestor.ingest_trade_result(&TradeResult {
            ticket: 0,
            base_id: "B1".to_string(),
            ..TradeResult::default()
        });
        f.ingestor.ingest_trade_result(&TradeResult {
            ticket: 5,
            base_id: String::new(),
            ..TradeResult::default()
        });
        assert!(f.store.pool_snapshot("B1").is_empty());
    }

    #[test]
    fn close_result_prunes_and_notifies() {
        let f = fixture();
        f.store.record_open("B1", 101);
        f.store.record_metadata("B1", "NQ", "Sim101");

        f.ingestor.ingest_trade_result(&close_result("B1", 101));

        assert!(f.store.pool_snapshot("B1").is_empty());
        assert!(f
            .store
            .was_ticket_recently_closed(101, Duration::from_secs(10)));

        let sent = f.notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].order_type, order_type::MT5_CLOSE);
        assert_eq!(sent[0].closure_reason, DEFAULT_CLOSURE_REASON);
        assert_eq!(sent[0].instrument, "NQ");
    }

    #[test]
    fn client_initiated_close_is_tagged_as_ack() {
        let f = fixture();
        f.store.record_open("B4", 404);
        f.store.mark_client_initiated(404);

        f.ingestor.ingest_trade_result(&close_result("B4", 404));

        let sent = f.notifier.sent.lock();
        assert_eq!(sent[0].order_type, order_type::NT_CLOSE_ACK);
    }

    #[test]
    fn partial_close_suppresses_generic_result() {
        let f = fixture();
        f.store.record_open("B3", 303);
        f.ingestor
            .ingest_hedge_close(&HedgeClose {
                base_id: "B3".to_string(),
                closure_reason: ELASTIC_PARTIAL_CLOSE.to_string(),
                ticket: 303,
                quantity: 0.5,
                ..HedgeClose::default()
            })
            .unwrap();

        // The partial itself was broadcast once.
        assert_eq!(f.notifier.sent.lock().len(), 1);
        assert_eq!(
            f.notifier.sent.lock()[0].closure_reason,
            ELASTIC_PARTIAL_CLOSE
        );

        // The generic close that follows is suppressed and the ticket stays
        // in the pool.
        f.ingestor.ingest_trade_result(&close_result("B3", 303));
        assert_eq!(f.notifier.sent.lock().len(), 1);
        assert_eq!(f.store.pool_snapshot("B3"), vec![303]);
    }

    #[test]
    fn completion_reclassifies_generic_result() {
        let f = fixture();
        f.store.record_open("B1", 110);
        f.ingestor
            .ingest_hedge_close(&HedgeClose {
                base_id: "B1".to_string(),
                closure_reason: "elastic_completion".to_string(),
                ticket: 110,
                quantity: 1.0,
                ..HedgeClose::default()
            })
            .unwrap();
        // Completion prunes the ticket; a duplicate generic result for the
        // same base would be reclassified were the marker still fresh.
        assert!(f.store.pool_snapshot("B1").is_empty());
        let sent = f.notifier.sent.lock();
        assert_eq!(sent[0].closure_reason, "elastic_completion");
    }

    #[test]
    fn ticketless_executor_close_infers_pool_head() {
        let f = fixture();
        f.store.record_open("B6", 601);
        f.store.record_open("B6", 602);

        f.ingestor
            .ingest_hedge_close(&HedgeClose {
                base_id: "B6".to_string(),
                closure_reason: "MT5_stop_loss".to_string(),
                ticket: 0,
                quantity: 1.0,
                ..HedgeClose::default()
            })
            .unwrap();

        let sent = f.notifier.sent.lock();
        assert_eq!(sent[0].mt5_ticket, 601);
        drop(sent);
        assert_eq!(f.store.pool_snapshot("B6"), vec![602]);
    }

    #[test]
    fn non_executor_reason_is_ignored() {
        let f = fixture();
        f.store.record_open("B1", 1);
        f.ingestor
            .ingest_hedge_close(&HedgeClose {
                base_id: "B1".to_string(),
                closure_reason: "NT_manual".to_string(),
                ticket: 1,
                ..HedgeClose::default()
            })
            .unwrap();
        assert!(f.notifier.sent.lock().is_empty());
        assert_eq!(f.store.pool_snapshot("B1"), vec![1]);
    }

    #[tokio::test]
    async fn elastic_update_enriches_from_hint() {
        let f = fixture();
        f.store.record_elastic_hint("B1", 85.0, "NQ", "Sim101");

        f.ingestor
            .ingest_elastic_update(&ElasticUpdate {
                base_id: "B1".to_string(),
                current_profit: 120.5,
                profit_level: 2,
                ticket: 7,
            })
            .await
            .unwrap();

        let event = f.queue.poll().unwrap();
        assert_eq!(event.event_type, "elastic_hedge_update");
        assert!((event.nt_points_per_1k_loss - 85.0).abs() < f64::EPSILON);
        assert!((event.elastic_current_profit - 120.5).abs() < f64::EPSILON);
        assert_eq!(event.elastic_profit_level, 2);
        assert_eq!(event.instrument, "NQ");
    }

    #[tokio::test(start_paused = true)]
    async fn elastic_update_waits_for_late_hint() {
        let f = fixture();
        let store = Arc::clone(&f.store);
        let fill = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            store.record_elastic_hint("B2", 42.0, "ES", "Sim102");
        });

        f.ingestor
            .ingest_elastic_update(&ElasticUpdate {
                base_id: "B2".to_string(),
                current_profit: 10.0,
                profit_level: 1,
                ticket: 0,
            })
            .await
            .unwrap();
        fill.await.unwrap();

        let event = f.queue.poll().unwrap();
        assert!((event.nt_points_per_1k_loss - 42.0).abs() < f64::EPSILON);
    }
}
