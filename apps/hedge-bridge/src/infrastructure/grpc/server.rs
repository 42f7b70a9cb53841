//! gRPC Server Implementation
//!
//! Implements the `TradingService`, `StreamingService`, and `LoggingService`
//! services over the core components.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

use super::proto::bridge::v1::{
    ElasticHedgeUpdate, GenericResponse, HealthRequest, HealthResponse, HeartbeatRequest,
    HeartbeatResponse, HedgeCloseNotification, LogAck, LogEvent, Mt5TradeResult,
    Trade as ProtoTrade, logging_service_server::LoggingService,
    streaming_service_server::StreamingService, trading_service_server::TradingService,
};
use crate::application::close_orchestrator::{CloseOrchestrator, CloseOutcome, CloseRequest};
use crate::application::error::BridgeError;
use crate::application::queue::TradeQueue;
use crate::application::result_ingestor::{
    ElasticUpdate, HedgeClose, ResultIngestor, TradeResult,
};
use crate::application::status::BridgeStatus;
use crate::application::submission::{SubmitOutcome, TradeSubmitter};
use crate::domain::trade::{normalize_timestamp, normalize_trade_id, Trade, TradeAction};
use crate::infrastructure::fanout::{SharedFanoutHub, StreamKind, STREAM_CHANNEL_CAPACITY};

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Interval between health-ping log lines per source.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Streams that die faster than this were probably cut by a client-side
/// idle timeout; worth a louder log line.
const EARLY_DISCONNECT_THRESHOLD: Duration = Duration::from_secs(15);

/// Upstream source tags accepted as proof-of-life for the platform addon.
const ADDON_SOURCES: &[&str] = &[
    "ADDON",
    "NT_ADDON",
    "NT_ADDON_INIT",
    "NT_ADDON_KEEPALIVE",
    "NT",
    "NINJATRADER",
];

/// Downstream source tags accepted as proof-of-life for the executor.
const EXECUTOR_SOURCES: &[&str] = &["HEDGEBOT", "MT5_EA", "MT5"];

// =============================================================================
// Server
// =============================================================================

/// gRPC facade over the bridge core.
pub struct BridgeServer {
    submitter: Arc<TradeSubmitter>,
    orchestrator: Arc<CloseOrchestrator>,
    ingestor: Arc<ResultIngestor>,
    fanout: SharedFanoutHub,
    queue: Arc<TradeQueue>,
    status: Arc<BridgeStatus>,
    health_log: parking_lot::Mutex<HashMap<String, Instant>>,
}

impl BridgeServer {
    /// Create the server over the shared core components.
    #[must_use]
    pub fn new(
        submitter: Arc<TradeSubmitter>,
        orchestrator: Arc<CloseOrchestrator>,
        ingestor: Arc<ResultIngestor>,
        fanout: SharedFanoutHub,
        queue: Arc<TradeQueue>,
        status: Arc<BridgeStatus>,
    ) -> Self {
        Self {
            submitter,
            orchestrator,
            ingestor,
            fanout,
            queue,
            status,
            health_log: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Rate-limit noisy per-source logging (health pings, keepalives).
    fn should_log_health(&self, source: &str, interval: Duration) -> bool {
        let key = if source.is_empty() { "unknown" } else { source };
        let mut last = self.health_log.lock();
        let now = Instant::now();
        match last.get(key) {
            Some(at) if now.duration_since(*at) < interval => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }

    fn touch_liveness_for_source(&self, source: &str) {
        let upper = source.trim().to_uppercase();
        if EXECUTOR_SOURCES.contains(&upper.as_str()) {
            self.status.set_hedgebot_active(true);
        } else if ADDON_SOURCES.contains(&upper.as_str()) {
            self.status.set_addon_connected(true);
        }
    }

    fn success(message: &str) -> GenericResponse {
        GenericResponse {
            status: "success".to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }
}

fn status_from(err: &BridgeError) -> Status {
    Status::new(err.grpc_code(), err.to_string())
}

// =============================================================================
// TradingService
// =============================================================================

#[tonic::async_trait]
impl TradingService for BridgeServer {
    async fn submit_trade(&self, request: Request<ProtoTrade>) -> RpcResult<GenericResponse> {
        let req = request.into_inner();
        tracing::info!(
            trade_id = %req.id,
            action = %req.action,
            quantity = req.quantity,
            "received trade submission"
        );

        self.status.set_addon_connected(true);
        let trade = proto_to_trade(req)?;
        let trade_id = trade.id.clone();

        match self.submitter.submit(trade) {
            Ok(SubmitOutcome::Queued) => {
                metrics::counter!("bridge_trades_admitted_total").increment(1);
                let mut response = Self::success("Trade processed successfully");
                response.metadata.insert("trade_id".to_string(), trade_id);
                response
                    .metadata
                    .insert("timestamp".to_string(), Utc::now().to_rfc3339());
                response
                    .metadata
                    .insert("queue_size".to_string(), self.queue.len().to_string());
                Ok(Response::new(response))
            }
            Ok(SubmitOutcome::DuplicateSuppressed) => {
                metrics::counter!("bridge_duplicates_suppressed_total").increment(1);
                Ok(Response::new(Self::success("Duplicate suppressed")))
            }
            Err(err) => {
                if err == BridgeError::QueueFull {
                    metrics::counter!("bridge_queue_full_total").increment(1);
                }
                tracing::warn!(trade_id = %trade_id, error = %err, "failed to enqueue trade");
                Err(status_from(&err))
            }
        }
    }

    type GetTradesStream = BoxedStream<ProtoTrade>;

    async fn get_trades(
        &self,
        request: Request<Streaming<HealthRequest>>,
    ) -> RpcResult<Self::GetTradesStream> {
        let mut inbound = request.into_inner();
        let (stream_id, mut trade_rx) = self.fanout.register(StreamKind::Downstream);
        tracing::info!(stream_id = %stream_id, "executor trade stream connected");

        tokio::spawn(Arc::clone(&self.fanout).run_forwarding_loop(stream_id.clone()));

        // Inbound pings prove executor liveness.
        {
            let status = Arc::clone(&self.status);
            let stream_id = stream_id.clone();
            tokio::spawn(async move {
                while let Ok(Some(ping)) = inbound.message().await {
                    status.set_hedgebot_active(true);
                    tracing::trace!(
                        stream_id = %stream_id,
                        source = %ping.source,
                        "executor stream ping"
                    );
                }
            });
        }

        // Pump trades from the fanout channel to the gRPC stream, applying
        // the final stale-close gate just before the wire.
        let (grpc_tx, grpc_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let fanout = Arc::clone(&self.fanout);
        let pump_stream_id = stream_id.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            loop {
                tokio::select! {
                    () = grpc_tx.closed() => break,
                    trade = trade_rx.recv() => {
                        let Some(trade) = trade else { break };
                        if fanout.is_stale_close(&trade) {
                            tracing::info!(
                                stream_id = %pump_stream_id,
                                trade_id = %trade.id,
                                mt5_ticket = trade.mt5_ticket,
                                "suppressed stale CLOSE_HEDGE at send"
                            );
                            continue;
                        }
                        tracing::debug!(
                            stream_id = %pump_stream_id,
                            trade_id = %trade.id,
                            action = trade.action.as_str(),
                            "sending trade to executor stream"
                        );
                        if grpc_tx.send(Ok(trade_to_proto(&trade))).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let uptime = started.elapsed();
            if uptime < EARLY_DISCONNECT_THRESHOLD {
                tracing::warn!(
                    stream_id = %pump_stream_id,
                    uptime_ms = uptime.as_millis() as u64,
                    "executor stream ended early; check client-side streaming timeout"
                );
            } else {
                tracing::info!(stream_id = %pump_stream_id, "executor trade stream disconnected");
            }
            fanout.remove(&pump_stream_id);
        });

        let stream = ReceiverStream::new(grpc_rx);
        Ok(Response::new(Box::pin(stream) as Self::GetTradesStream))
    }

    async fn submit_trade_result(
        &self,
        request: Request<Mt5TradeResult>,
    ) -> RpcResult<GenericResponse> {
        let req = request.into_inner();
        tracing::info!(
            mt5_ticket = req.ticket,
            status = %req.status,
            is_close = req.is_close,
            "received executor trade result"
        );

        self.status.set_hedgebot_active(true);
        self.ingestor.ingest_trade_result(&TradeResult {
            status: req.status,
            ticket: req.ticket,
            volume: req.volume,
            is_close: req.is_close,
            base_id: req.id,
        });

        Ok(Response::new(Self::success(
            "Trade result processed successfully",
        )))
    }

    async fn notify_hedge_close(
        &self,
        request: Request<HedgeCloseNotification>,
    ) -> RpcResult<GenericResponse> {
        let req = request.into_inner();
        tracing::info!(
            base_id = %req.base_id,
            closure_reason = %req.closure_reason,
            mt5_ticket = req.mt5_ticket,
            "received hedge close notification"
        );

        self.status.set_hedgebot_active(true);
        self.ingestor
            .ingest_hedge_close(&HedgeClose {
                base_id: req.base_id,
                instrument: req.instrument,
                account: req.account_name,
                quantity: req.quantity,
                closure_reason: req.closure_reason,
                ticket: req.mt5_ticket,
            })
            .map_err(|err| status_from(&err))?;

        Ok(Response::new(Self::success(
            "Hedge close notification processed successfully",
        )))
    }

    async fn submit_elastic_update(
        &self,
        request: Request<ElasticHedgeUpdate>,
    ) -> RpcResult<GenericResponse> {
        let req = request.into_inner();
        tracing::info!(
            base_id = %req.base_id,
            profit_level = req.profit_level,
            "received elastic update"
        );

        self.ingestor
            .ingest_elastic_update(&ElasticUpdate {
                base_id: req.base_id,
                current_profit: req.current_profit,
                profit_level: req.profit_level,
                ticket: req.mt5_ticket,
            })
            .await
            .map_err(|err| status_from(&err))?;

        Ok(Response::new(Self::success(
            "Elastic update processed successfully",
        )))
    }

    async fn close_hedge(
        &self,
        request: Request<HedgeCloseNotification>,
    ) -> RpcResult<GenericResponse> {
        let req = request.into_inner();
        tracing::info!(
            base_id = %req.base_id,
            mt5_ticket = req.mt5_ticket,
            "received platform close hedge request"
        );

        self.status.set_addon_connected(true);
        let outcome = self
            .orchestrator
            .close_hedge(CloseRequest {
                base_id: req.base_id,
                instrument: req.instrument,
                account: req.account_name,
                ticket: req.mt5_ticket,
            })
            .await
            .map_err(|err| status_from(&err))?;

        let message = match outcome {
            CloseOutcome::Dispatched(ticket) => {
                metrics::counter!("bridge_closes_dispatched_total").increment(1);
                format!("CLOSE_HEDGE dispatched for ticket {ticket}")
            }
            CloseOutcome::AlreadyInFlight => "Close already in flight".to_string(),
            CloseOutcome::NothingOpen => "No open hedge; close is idempotent".to_string(),
        };
        Ok(Response::new(Self::success(&message)))
    }

    async fn health_check(&self, request: Request<HealthRequest>) -> RpcResult<HealthResponse> {
        let req = request.into_inner();
        if self.should_log_health(&req.source, HEALTH_LOG_INTERVAL) {
            tracing::info!(source = %req.source, "health check");
        }
        self.touch_liveness_for_source(&req.source);

        Ok(Response::new(HealthResponse {
            status: "healthy".to_string(),
            queue_size: i32::try_from(self.queue.len()).unwrap_or(i32::MAX),
            net_position: i32::try_from(self.status.net_position()).unwrap_or(i32::MAX),
            hedge_size: self.status.hedge_size(),
        }))
    }

    async fn system_heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> RpcResult<HeartbeatResponse> {
        let req = request.into_inner();
        if self.should_log_health(&req.component, HEALTH_LOG_INTERVAL) {
            tracing::info!(component = %req.component, status = %req.status, "system heartbeat");
        }
        self.touch_liveness_for_source(&req.component);

        Ok(Response::new(HeartbeatResponse {
            status: "acknowledged".to_string(),
            message: "Heartbeat received successfully".to_string(),
        }))
    }
}

// =============================================================================
// StreamingService
// =============================================================================

#[tonic::async_trait]
impl StreamingService for BridgeServer {
    type TradingStreamStream = BoxedStream<ProtoTrade>;

    async fn trading_stream(
        &self,
        request: Request<Streaming<ProtoTrade>>,
    ) -> RpcResult<Self::TradingStreamStream> {
        let mut inbound = request.into_inner();
        let (stream_id, mut event_rx) = self.fanout.register(StreamKind::Upstream);
        tracing::info!(stream_id = %stream_id, "platform trading stream connected");

        self.status.set_addon_connected(true);

        // Inbound trades are admitted exactly like unary submissions; any
        // inbound message refreshes addon liveness.
        {
            let submitter = Arc::clone(&self.submitter);
            let status = Arc::clone(&self.status);
            let stream_id = stream_id.clone();
            tokio::spawn(async move {
                loop {
                    match inbound.message().await {
                        Ok(Some(proto_trade)) => {
                            status.set_addon_connected(true);
                            let trade_id = proto_trade.id.clone();
                            match proto_to_trade(proto_trade) {
                                Ok(trade) => match submitter.submit(trade) {
                                    Ok(SubmitOutcome::Queued) => {
                                        metrics::counter!("bridge_trades_admitted_total")
                                            .increment(1);
                                    }
                                    Ok(SubmitOutcome::DuplicateSuppressed) => {
                                        metrics::counter!("bridge_duplicates_suppressed_total")
                                            .increment(1);
                                    }
                                    Err(err) => {
                                        tracing::warn!(
                                            stream_id = %stream_id,
                                            trade_id = %trade_id,
                                            error = %err,
                                            "failed to admit streamed trade"
                                        );
                                    }
                                },
                                Err(err) => {
                                    tracing::warn!(
                                        stream_id = %stream_id,
                                        trade_id = %trade_id,
                                        error = %err,
                                        "malformed streamed trade"
                                    );
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::debug!(
                                stream_id = %stream_id,
                                error = %err,
                                "platform stream recv error"
                            );
                            break;
                        }
                    }
                }
            });
        }

        // Pump close notifications to the platform.
        let (grpc_tx, grpc_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let fanout = Arc::clone(&self.fanout);
        let pump_stream_id = stream_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = grpc_tx.closed() => break,
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        if grpc_tx.send(Ok(trade_to_proto(&event))).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(stream_id = %pump_stream_id, "platform trading stream disconnected");
            fanout.remove(&pump_stream_id);
        });

        let stream = ReceiverStream::new(grpc_rx);
        Ok(Response::new(Box::pin(stream) as Self::TradingStreamStream))
    }
}

// =============================================================================
// LoggingService
// =============================================================================

#[tonic::async_trait]
impl LoggingService for BridgeServer {
    async fn log(&self, request: Request<LogEvent>) -> RpcResult<LogAck> {
        let event = request.into_inner();
        self.touch_liveness_for_source(&event.source);

        // Forward into the tracing pipeline at the client-reported level.
        // Ingest is best-effort and never fails the caller.
        match event.level.to_uppercase().as_str() {
            "ERROR" | "FATAL" => tracing::error!(
                source = %event.source,
                component = %event.component,
                base_id = %event.base_id,
                trade_id = %event.trade_id,
                mt5_ticket = event.mt5_ticket,
                error_code = %event.error_code,
                "{}",
                event.message
            ),
            "WARN" | "WARNING" => tracing::warn!(
                source = %event.source,
                component = %event.component,
                base_id = %event.base_id,
                trade_id = %event.trade_id,
                mt5_ticket = event.mt5_ticket,
                "{}",
                event.message
            ),
            "DEBUG" | "TRACE" => tracing::debug!(
                source = %event.source,
                component = %event.component,
                base_id = %event.base_id,
                "{}",
                event.message
            ),
            _ => tracing::info!(
                source = %event.source,
                component = %event.component,
                base_id = %event.base_id,
                "{}",
                event.message
            ),
        }

        Ok(Response::new(LogAck {
            accepted: 1,
            dropped: 0,
        }))
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

/// Convert a wire trade into the typed core event, normalizing identifiers
/// and the timestamp.
fn proto_to_trade(proto: ProtoTrade) -> Result<Trade, Status> {
    let action = TradeAction::parse(&proto.action).ok_or_else(|| {
        Status::invalid_argument(format!("unknown trade action: {:?}", proto.action))
    })?;

    Ok(Trade {
        id: normalize_trade_id(&proto.id, &proto.base_id),
        base_id: proto.base_id.trim().to_string(),
        time: normalize_timestamp(proto.timestamp),
        action,
        quantity: proto.quantity,
        price: proto.price,
        total_quantity: proto.total_quantity,
        contract_num: proto.contract_num,
        order_type: proto.order_type,
        instrument: proto.instrument,
        account: proto.account_name,
        mt5_ticket: proto.mt5_ticket,
        nt_points_per_1k_loss: proto.nt_points_per_1k_loss,
        event_type: proto.event_type,
        elastic_current_profit: proto.elastic_current_profit,
        elastic_profit_level: proto.elastic_profit_level,
        closure_reason: proto.closure_reason,
    })
}

fn trade_to_proto(trade: &Trade) -> ProtoTrade {
    ProtoTrade {
        id: trade.id.clone(),
        base_id: trade.base_id.clone(),
        timestamp: trade.time.timestamp(),
        action: trade.action.as_str().to_string(),
        quantity: trade.quantity,
        price: trade.price,
        total_quantity: trade.total_quantity,
        contract_num: trade.contract_num,
        order_type: trade.order_type.clone(),
        instrument: trade.instrument.clone(),
        account_name: trade.account.clone(),
        mt5_ticket: trade.mt5_ticket,
        nt_points_per_1k_loss: trade.nt_points_per_1k_loss,
        event_type: trade.event_type.clone(),
        elastic_current_profit: trade.elastic_current_profit,
        elastic_profit_level: trade.elastic_profit_level,
        closure_reason: trade.closure_reason.clone(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_conversion_normalizes_identity() {
        let proto = ProtoTrade {
            id: String::new(),
            base_id: "B1".to_string(),
            action: "buy".to_string(),
            quantity: 1.0,
            ..ProtoTrade::default()
        };
        let trade = proto_to_trade(proto).unwrap();
        assert_eq!(trade.id, "B1");
        assert_eq!(trade.action, TradeAction::Buy);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let proto = ProtoTrade {
            id: "T1".to_string(),
            action: "cancel".to_string(),
            ..ProtoTrade::default()
        };
        let err = proto_to_trade(proto).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn trade_round_trips_to_proto() {
        let trade = Trade::close_hedge("B1", 42, "NQ", "Sim101");
        let proto = trade_to_proto(&trade);
        assert_eq!(proto.action, "CLOSE_HEDGE");
        assert_eq!(proto.mt5_ticket, 42);
        let back = proto_to_trade(proto).unwrap();
        assert_eq!(back.action, TradeAction::CloseHedge);
        assert_eq!(back.mt5_ticket, 42);
    }
}
