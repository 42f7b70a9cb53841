//! Close Orchestration Integration Tests
//!
//! Exercises the correlation engine end to end through the library API:
//! open/close round trips, out-of-order arrivals, elastic suppression,
//! origin tagging, duplicate suppression, and stale-close gating.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hedge_bridge::{
    BridgeStatus, CloseNotifier, CloseOrchestrator, CloseOutcome, CloseRequest, CorrelationStore,
    ElasticUpdate, FanoutHub, HedgeClose, ResultIngestor, StreamKind, Trade, TradeAction,
    TradeQueue, TradeResult, TradeSubmitter,
};

// =============================================================================
// Fixture
// =============================================================================

struct Bridge {
    store: Arc<CorrelationStore>,
    queue: Arc<TradeQueue>,
    status: Arc<BridgeStatus>,
    fanout: Arc<FanoutHub>,
    submitter: TradeSubmitter,
    orchestrator: CloseOrchestrator,
    ingestor: ResultIngestor,
}

fn bridge() -> Bridge {
    let store = Arc::new(CorrelationStore::new());
    let queue = Arc::new(TradeQueue::with_defaults());
    let status = Arc::new(BridgeStatus::new());
    let fanout = Arc::new(FanoutHub::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&status),
    ));
    let submitter = TradeSubmitter::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&status),
    );
    let orchestrator = CloseOrchestrator::new(Arc::clone(&store), Arc::clone(&queue));
    let ingestor = ResultIngestor::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&status),
        Arc::clone(&fanout) as Arc<dyn CloseNotifier>,
    );
    Bridge {
        store,
        queue,
        status,
        fanout,
        submitter,
        orchestrator,
        ingestor,
    }
}

fn buy(id: &str, base_id: &str) -> Trade {
    Trade {
        id: id.to_string(),
        base_id: base_id.to_string(),
        time: Utc::now(),
        action: TradeAction::Buy,
        quantity: 1.0,
        price: 19250.0,
        total_quantity: 1,
        contract_num: 1,
        order_type: "ENTRY".to_string(),
        instrument: "NQ".to_string(),
        account: "Sim101".to_string(),
        mt5_ticket: 0,
        nt_points_per_1k_loss: 85.0,
        event_type: String::new(),
        elastic_current_profit: 0.0,
        elastic_profit_level: 0,
        closure_reason: String::new(),
    }
}

fn open_result(base_id: &str, ticket: u64) -> TradeResult {
    TradeResult {
        status: String::new(),
        ticket,
        volume: 1.0,
        is_close: false,
        base_id: base_id.to_string(),
    }
}

fn close_result(base_id: &str, ticket: u64) -> TradeResult {
    TradeResult {
        status: String::new(),
        ticket,
        volume: 1.0,
        is_close: true,
        base_id: base_id.to_string(),
    }
}

fn close_request(base_id: &str) -> CloseRequest {
    CloseRequest {
        base_id: base_id.to_string(),
        instrument: "NQ".to_string(),
        account: "Sim101".to_string(),
        ticket: 0,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

/// S1: basic open/close round trip dispatches the fill's ticket.
#[tokio::test]
async fn basic_open_close_round_trip() {
    let b = bridge();

    b.submitter.submit(buy("T1", "B1")).unwrap();
    let entry = b.queue.poll().unwrap();
    assert_eq!(entry.action, TradeAction::Buy);

    b.ingestor.ingest_trade_result(&open_result("B1", 101));

    let outcome = b.orchestrator.close_hedge(close_request("B1")).await.unwrap();
    assert_eq!(outcome, CloseOutcome::Dispatched(101));

    let close = b.queue.poll().unwrap();
    assert_eq!(close.action, TradeAction::CloseHedge);
    assert_eq!(close.base_id, "B1");
    assert_eq!(close.mt5_ticket, 101);
    assert!((close.quantity - 1.0).abs() < f64::EPSILON);
}

/// S2: a close arriving before the fill succeeds within the bounded wait.
#[tokio::test(start_paused = true)]
async fn close_before_fill_resolves_within_wait() {
    let b = bridge();
    b.submitter.submit(buy("T2", "B2")).unwrap();

    let store = Arc::clone(&b.store);
    let fill = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        store.record_open("B2", 202);
    });

    let outcome = b.orchestrator.close_hedge(close_request("B2")).await.unwrap();
    assert_eq!(outcome, CloseOutcome::Dispatched(202));
    fill.await.unwrap();

    // Entry first, then the close carrying the late ticket.
    assert_eq!(b.queue.poll().unwrap().action, TradeAction::Buy);
    assert_eq!(b.queue.poll().unwrap().mt5_ticket, 202);
}

/// S3: elastic partial close notifies once and suppresses the generic close
/// result that follows; the ticket stays in the pool.
#[tokio::test]
async fn elastic_partial_close_is_suppressed_once() {
    let b = bridge();
    let (_up, mut up_rx) = b.fanout.register(StreamKind::Upstream);

    b.ingestor.ingest_trade_result(&open_result("B3", 303));
    b.ingestor
        .ingest_hedge_close(&HedgeClose {
            base_id: "B3".to_string(),
            instrument: "NQ".to_string(),
            account: "Sim101".to_string(),
            quantity: 0.5,
            closure_reason: "elastic_partial_close".to_string(),
            ticket: 303,
        })
        .unwrap();

    // Generic close result arrives moments later.
    b.ingestor.ingest_trade_result(&close_result("B3", 303));

    let first = up_rx.try_recv().unwrap();
    assert_eq!(first.closure_reason, "elastic_partial_close");
    assert!((first.quantity - 0.5).abs() < f64::EPSILON);
    // No second notification.
    assert!(up_rx.try_recv().is_err());
    // Position remains open.
    assert_eq!(b.store.pool_snapshot("B3"), vec![303]);
}

/// S4: an executor close confirming a platform-initiated close is tagged as
/// an acknowledgement.
#[tokio::test]
async fn platform_initiated_close_is_acked() {
    let b = bridge();
    let (_up, mut up_rx) = b.fanout.register(StreamKind::Upstream);

    b.ingestor.ingest_trade_result(&open_result("B4", 404));
    let outcome = b.orchestrator.close_hedge(close_request("B4")).await.unwrap();
    assert_eq!(outcome, CloseOutcome::Dispatched(404));

    b.ingestor.ingest_trade_result(&close_result("B4", 404));

    let notification = up_rx.try_recv().unwrap();
    assert_eq!(notification.action, TradeAction::Mt5CloseNotification);
    assert_eq!(notification.order_type, "NT_CLOSE_ACK");
    assert_eq!(notification.mt5_ticket, 404);
}

/// S5: duplicate trade ids within the window yield one queued trade.
#[tokio::test]
async fn duplicate_submission_is_suppressed() {
    let b = bridge();
    b.submitter.submit(buy("T5", "B5")).unwrap();
    b.submitter.submit(buy("T5", "B5")).unwrap();
    assert_eq!(b.queue.len(), 1);
}

/// S6: a delayed close for an already-closed ticket is dropped by the
/// forwarding loop without reaching the stream.
#[tokio::test(start_paused = true)]
async fn stale_close_is_gated_before_send() {
    let b = bridge();

    b.ingestor.ingest_trade_result(&open_result("B6", 606));
    // Executor reports the close; ticket becomes recently-closed.
    b.ingestor.ingest_trade_result(&close_result("B6", 606));

    // A delayed CLOSE_HEDGE for the same ticket is still in the queue.
    b.queue
        .enqueue(Trade::close_hedge("B6", 606, "NQ", "Sim101"))
        .unwrap();
    b.queue
        .enqueue(Trade::close_hedge("B6", 607, "NQ", "Sim101"))
        .unwrap();

    let (stream_id, mut rx) = b.fanout.register(StreamKind::Downstream);
    tokio::spawn(Arc::clone(&b.fanout).run_forwarding_loop(stream_id.clone()));

    // Only the live close arrives; the stale one was gated.
    let got = rx.recv().await.unwrap();
    assert_eq!(got.mt5_ticket, 607);
    b.fanout.remove(&stream_id);
}

// =============================================================================
// Properties
// =============================================================================

/// FIFO allocation: closes receive tickets in fill order.
#[tokio::test]
async fn closes_allocate_tickets_in_fill_order() {
    let b = bridge();
    for ticket in [11, 12, 13] {
        b.ingestor.ingest_trade_result(&open_result("B7", ticket));
    }

    for expected in [11, 12, 13] {
        let outcome = b.orchestrator.close_hedge(close_request("B7")).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Dispatched(expected));
        assert_eq!(b.queue.poll().unwrap().mt5_ticket, expected);
    }
}

/// At-most-once per ticket: a close request naming a confirmed-closed ticket
/// is dispatched to the queue but gated before the wire.
#[tokio::test(start_paused = true)]
async fn confirmed_closed_ticket_is_not_reissued() {
    let b = bridge();
    b.ingestor.ingest_trade_result(&open_result("B8", 808));
    b.ingestor.ingest_trade_result(&close_result("B8", 808));

    // Retry names the ticket explicitly.
    let outcome = b
        .orchestrator
        .close_hedge(CloseRequest {
            ticket: 808,
            ..close_request("B8")
        })
        .await
        .unwrap();
    assert_eq!(outcome, CloseOutcome::Dispatched(808));

    let (stream_id, mut rx) = b.fanout.register(StreamKind::Downstream);
    tokio::spawn(Arc::clone(&b.fanout).run_forwarding_loop(stream_id.clone()));

    // Nothing reaches the stream; verify by racing a sentinel through.
    b.queue
        .enqueue(Trade::close_hedge("B8", 809, "NQ", "Sim101"))
        .unwrap();
    let got = rx.recv().await.unwrap();
    assert_eq!(got.mt5_ticket, 809);
    b.fanout.remove(&stream_id);
}

/// Idempotent close on an empty base: success, nothing dispatched.
#[tokio::test(start_paused = true)]
async fn close_with_nothing_open_is_idempotent() {
    let b = bridge();
    let outcome = b.orchestrator.close_hedge(close_request("B9")).await.unwrap();
    assert_eq!(outcome, CloseOutcome::NothingOpen);
    assert!(b.queue.poll().is_none());
}

/// Elastic events carry the cached sizing hint from the entry.
#[tokio::test]
async fn elastic_event_carries_cached_hint() {
    let b = bridge();
    b.submitter.submit(buy("T10", "B10")).unwrap();
    let _ = b.queue.poll();

    b.ingestor
        .ingest_elastic_update(&ElasticUpdate {
            base_id: "B10".to_string(),
            current_profit: 55.0,
            profit_level: 3,
            ticket: 0,
        })
        .await
        .unwrap();

    let event = b.queue.poll().unwrap();
    assert_eq!(event.action, TradeAction::Event);
    assert_eq!(event.event_type, "elastic_hedge_update");
    assert!((event.nt_points_per_1k_loss - 85.0).abs() < f64::EPSILON);
    assert_eq!(event.instrument, "NQ");
}

/// Net position and hedge accounting track entries and fills.
#[tokio::test]
async fn status_counters_follow_lifecycle() {
    let b = bridge();
    b.submitter.submit(buy("T11", "B11")).unwrap();
    assert_eq!(b.status.net_position(), 1);

    b.ingestor.ingest_trade_result(&open_result("B11", 1111));
    assert!((b.status.hedge_size() - 1.0).abs() < f64::EPSILON);

    b.ingestor.ingest_trade_result(&close_result("B11", 1111));
    assert!((b.status.hedge_size() - 0.0).abs() < f64::EPSILON);
}
