//! Hedge Bridge Binary
//!
//! Starts the trade correlation bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin hedge-bridge
//! ```
//!
//! # Environment Variables
//!
//! - `BRIDGE_GRPC_PORT`: gRPC server port (default: 50051)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port (default: 8081)
//! - `BRIDGE_TRADE_QUEUE_CAPACITY`: Outbound queue capacity (default: 100)
//! - `BRIDGE_LOG_FORMAT`: Console log format - "text" | "json" (default: text)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: hedge-bridge)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use hedge_bridge::proto::logging_service_server::LoggingServiceServer;
use hedge_bridge::proto::streaming_service_server::StreamingServiceServer;
use hedge_bridge::proto::trading_service_server::TradingServiceServer;
use hedge_bridge::{
    BridgeConfig, BridgeServer, BridgeStatus, CloseNotifier, CloseOrchestrator, CorrelationStore,
    FanoutHub, HealthServer, HealthServerState, ResultIngestor, TradeQueue, TradeSubmitter,
    infrastructure::telemetry, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional .env for local runs; deployed instances get real env vars.
    let _ = dotenvy::dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Hedge Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core components
    let store = Arc::new(CorrelationStore::new());
    let queue = Arc::new(TradeQueue::new(config.queue.trade_queue_capacity));
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

    // Idle-queue monitor warns when trades buffer with no executor stream.
    tokio::spawn(
        Arc::clone(&fanout).run_idle_queue_monitor(shutdown_token.clone()),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&status),
        Arc::clone(&queue),
        Arc::clone(&fanout),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // gRPC server
    let server = Arc::new(BridgeServer::new(
        submitter,
        orchestrator,
        ingestor,
        Arc::clone(&fanout),
        Arc::clone(&queue),
        Arc::clone(&status),
    ));

    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.server.grpc_port).parse()?;
    let grpc_shutdown = shutdown_token.clone();
    let grpc_status = Arc::clone(&status);

    let grpc_task = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        grpc_status.set_bridge_active(true);
        let result = Server::builder()
            .add_service(TradingServiceServer::from_arc(Arc::clone(&server)))
            .add_service(StreamingServiceServer::from_arc(Arc::clone(&server)))
            .add_service(LoggingServiceServer::from_arc(Arc::clone(&server)))
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled())
            .await;
        grpc_status.set_bridge_active(false);
        if let Err(e) = result {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Hedge bridge ready");

    let signal = shutdown_signal().await;
    tracing::info!(signal, "shutdown signal received");
    shutdown_token.cancel();
    let _ = grpc_task.await;

    tracing::info!("Hedge bridge stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        queue_capacity = config.queue.trade_queue_capacity,
        "Configuration loaded"
    );
}

/// Wait for a termination signal and report which one fired.
#[allow(clippy::expect_used)]
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler must install at startup");
        tokio::select! {
            _ = signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        "ctrl-c"
    }
}
