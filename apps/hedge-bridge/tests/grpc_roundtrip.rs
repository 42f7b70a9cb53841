//! gRPC Round-Trip Integration Tests
//!
//! Tests the full wire flow: platform submissions in, executor stream out,
//! executor results in, platform notifications out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::transport::{Channel, Server};

use hedge_bridge::proto::logging_service_client::LoggingServiceClient;
use hedge_bridge::proto::logging_service_server::LoggingServiceServer;
use hedge_bridge::proto::streaming_service_client::StreamingServiceClient;
use hedge_bridge::proto::streaming_service_server::StreamingServiceServer;
use hedge_bridge::proto::trading_service_client::TradingServiceClient;
use hedge_bridge::proto::trading_service_server::TradingServiceServer;
use hedge_bridge::proto::{
    HealthRequest, HeartbeatRequest, HedgeCloseNotification, LogEvent, Mt5TradeResult,
    Trade as ProtoTrade,
};
use hedge_bridge::{
    BridgeServer, BridgeStatus, CloseNotifier, CloseOrchestrator, CorrelationStore, FanoutHub,
    ResultIngestor, TradeQueue, TradeSubmitter,
};

// =============================================================================
// Test Server Setup
// =============================================================================

/// Start a bridge server on a random port and return connected clients.
async fn setup_test_server() -> (
    TradingServiceClient<Channel>,
    StreamingServiceClient<Channel>,
    LoggingServiceClient<Channel>,
    tokio::task::JoinHandle<()>,
) {
    let store = Arc::new(CorrelationStore::new());
    let queue = Arc::new(TradeQueue::with_defaults());
    let status = Arc::new(BridgeStatus::new());
    let fanout = Arc::new(FanoutHub::new(
        Arc::clone(&queue),
        Arc::clone(&store),
        Arc::clone(&status),
    ));
    let submitter = Arc::new(TradeSubmitter::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&status),
    ));
    let orchestrator = Arc::new(CloseOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&queue),
    ));
    let ingestor = Arc::new(ResultIngestor::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&status),
        Arc::clone(&fanout) as Arc<dyn CloseNotifier>,
    ));
    let server = Arc::new(BridgeServer::new(
        submitter,
        orchestrator,
        ingestor,
        Arc::clone(&fanout),
        Arc::clone(&queue),
        Arc::clone(&status),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_handle = tokio::spawn(async move {
        Server::builder()
            .add_service(TradingServiceServer::from_arc(Arc::clone(&server)))
            .add_service(StreamingServiceServer::from_arc(Arc::clone(&server)))
            .add_service(LoggingServiceServer::from_arc(Arc::clone(&server)))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    let endpoint = format!("http://{addr}");
    let trading = TradingServiceClient::connect(endpoint.clone()).await.unwrap();
    let streaming = StreamingServiceClient::connect(endpoint.clone())
        .await
        .unwrap();
    let logging = LoggingServiceClient::connect(endpoint).await.unwrap();

    (trading, streaming, logging, server_handle)
}

fn buy_trade(id: &str, base_id: &str) -> ProtoTrade {
    ProtoTrade {
        id: id.to_string(),
        base_id: base_id.to_string(),
        timestamp: 0,
        action: "BUY".to_string(),
        quantity: 1.0,
        price: 19250.0,
        total_quantity: 1,
        contract_num: 1,
        order_type: "ENTRY".to_string(),
        instrument: "NQ".to_string(),
        account_name: "Sim101".to_string(),
        mt5_ticket: 0,
        nt_points_per_1k_loss: 85.0,
        event_type: String::new(),
        elastic_current_profit: 0.0,
        elastic_profit_level: 0,
        closure_reason: String::new(),
    }
}

/// Open an executor trade stream, returning the ping sender and the trade
/// receiver.
async fn open_executor_stream(
    client: &mut TradingServiceClient<Channel>,
) -> (
    mpsc::Sender<HealthRequest>,
    tonic::codec::Streaming<ProtoTrade>,
) {
    let (ping_tx, ping_rx) = mpsc::channel(8);
    ping_tx
        .send(HealthRequest {
            source: "hedgebot".to_string(),
        })
        .await
        .unwrap();

    let response = client
        .get_trades(Request::new(ReceiverStream::new(ping_rx)))
        .await
        .unwrap();
    (ping_tx, response.into_inner())
}

// =============================================================================
// Trade Flow Tests
// =============================================================================

#[tokio::test]
async fn submitted_trade_reaches_executor_stream() {
    let (mut trading, _streaming, _logging, handle) = setup_test_server().await;
    let (_ping_tx, mut trades) = open_executor_stream(&mut trading).await;

    let response = trading
        .submit_trade(Request::new(buy_trade("T1", "B1")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status, "success");

    let trade = timeout(Duration::from_secs(2), trades.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(trade.id, "T1");
    assert_eq!(trade.action, "BUY");

    handle.abort();
}

#[tokio::test]
async fn duplicate_submission_yields_one_emission() {
    let (mut trading, _streaming, _logging, handle) = setup_test_server().await;
    let (_ping_tx, mut trades) = open_executor_stream(&mut trading).await;

    trading
        .submit_trade(Request::new(buy_trade("T5", "B5")))
        .await
        .unwrap();
    let second = trading
        .submit_trade(Request::new(buy_trade("T5", "B5")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(second.message, "Duplicate suppressed");

    let first = timeout(Duration::from_secs(2), trades.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.id, "T5");

    // No second trade shows up within the window.
    let extra = timeout(Duration::from_millis(300), trades.message()).await;
    assert!(extra.is_err(), "expected no duplicate emission");

    handle.abort();
}

#[tokio::test]
async fn close_hedge_round_trip_carries_fill_ticket() {
    let (mut trading, _streaming, _logging, handle) = setup_test_server().await;
    let (_ping_tx, mut trades) = open_executor_stream(&mut trading).await;

    // Entry and fill.
    trading
        .submit_trade(Request::new(buy_trade("T2", "B2")))
        .await
        .unwrap();
    trading
        .submit_trade_result(Request::new(Mt5TradeResult {
            status: "filled".to_string(),
            ticket: 202,
            volume: 1.0,
            is_close: false,
            id: "B2".to_string(),
        }))
        .await
        .unwrap();

    // Platform closes the position.
    let response = trading
        .close_hedge(Request::new(HedgeCloseNotification {
            base_id: "B2".to_string(),
            instrument: "NQ".to_string(),
            account_name: "Sim101".to_string(),
            quantity: 1.0,
            closure_reason: String::new(),
            mt5_ticket: 0,
            timestamp: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status, "success");

    // Executor sees the entry, then the targeted close.
    let entry = timeout(Duration::from_secs(2), trades.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(entry.action, "BUY");

    let close = timeout(Duration::from_secs(2), trades.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(close.action, "CLOSE_HEDGE");
    assert_eq!(close.mt5_ticket, 202);
    assert_eq!(close.base_id, "B2");

    handle.abort();
}

#[tokio::test]
async fn executor_close_notifies_platform_stream() {
    let (mut trading, mut streaming, _logging, handle) = setup_test_server().await;

    // Platform stream (upstream population).
    let (trade_tx, trade_rx) = mpsc::channel::<ProtoTrade>(8);
    let mut notifications = streaming
        .trading_stream(Request::new(ReceiverStream::new(trade_rx)))
        .await
        .unwrap()
        .into_inner();

    // Entry submitted over the stream, fill recorded, executor closes.
    trade_tx.send(buy_trade("T4", "B4")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    trading
        .submit_trade_result(Request::new(Mt5TradeResult {
            status: "filled".to_string(),
            ticket: 404,
            volume: 1.0,
            is_close: false,
            id: "B4".to_string(),
        }))
        .await
        .unwrap();
    trading
        .submit_trade_result(Request::new(Mt5TradeResult {
            status: String::new(),
            ticket: 404,
            volume: 1.0,
            is_close: true,
            id: "B4".to_string(),
        }))
        .await
        .unwrap();

    let notification = timeout(Duration::from_secs(2), notifications.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(notification.action, "MT5_CLOSE_NOTIFICATION");
    assert_eq!(notification.mt5_ticket, 404);
    assert_eq!(notification.order_type, "MT5_CLOSE");
    assert_eq!(notification.closure_reason, "MT5_position_closed");

    handle.abort();
}

// =============================================================================
// Health and Logging Tests
// =============================================================================

#[tokio::test]
async fn health_check_reports_queue_and_position() {
    let (mut trading, _streaming, _logging, handle) = setup_test_server().await;

    trading
        .submit_trade(Request::new(buy_trade("T6", "B6")))
        .await
        .unwrap();

    let health = trading
        .health_check(Request::new(HealthRequest {
            source: "nt_addon_init".to_string(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.queue_size, 1);
    assert_eq!(health.net_position, 1);

    handle.abort();
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let (mut trading, _streaming, _logging, handle) = setup_test_server().await;

    let ack = trading
        .system_heartbeat(Request::new(HeartbeatRequest {
            component: "NT_ADDON".to_string(),
            status: "alive".to_string(),
            timestamp: 0,
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.status, "acknowledged");

    handle.abort();
}

#[tokio::test]
async fn log_events_are_accepted() {
    let (_trading, _streaming, mut logging, handle) = setup_test_server().await;

    let ack = logging
        .log(Request::new(LogEvent {
            timestamp_ns: 0,
            source: "nt_addon".to_string(),
            level: "INFO".to_string(),
            component: "addon".to_string(),
            message: "connected".to_string(),
            base_id: "B1".to_string(),
            trade_id: String::new(),
            mt5_ticket: 0,
            error_code: String::new(),
            tags: Default::default(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(ack.accepted, 1);
    assert_eq!(ack.dropped, 0);

    handle.abort();
}
