#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::default_trait_access
    )
)]

//! Hedge Bridge - Trade Correlation Engine
//!
//! A gRPC bridge that correlates trade lifecycle events between an upstream
//! trading platform and a downstream hedge executor. The platform opens and
//! closes positions; for every opened position the executor opens a matched
//! hedge, and when either side closes, the counterparty is notified so its
//! matched position closes exactly once.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Correlation state machine and event types
//!   - `trade`: Trade events, actions, identifier normalization
//!   - `correlation`: BaseID ↔ ticket correlation store with TTL tables
//!
//! - **Application**: Orchestration over domain state
//!   - `queue`: Bounded outbound trade queue
//!   - `submission`: Trade admission with duplicate suppression
//!   - `close_orchestrator`: At-most-once close dispatch
//!   - `result_ingestor`: Executor result classification and notification
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `grpc`: Wire services translating protobuf to core events
//!   - `fanout`: Stream registry and forwarding loops
//!   - `config`: Environment configuration
//!   - `telemetry`: Tracing + OpenTelemetry
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Platform ──SubmitTrade──► TradeQueue ──25ms drain──► Executor stream
//!    ▲                                                      │
//!    │                                                 fill results
//!    │                                                      ▼
//!    └──close notifications◄── ResultIngestor ◄── CorrelationStore
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Correlation state machine and event types.
pub mod domain;

/// Application layer - Orchestration over domain state.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::correlation::{
    CorrelationStore, ElasticHint, ElasticMark, PendingClose, CLIENT_INITIATED_TTL,
    DUPLICATE_ID_TTL, ELASTIC_MARK_TTL, PENDING_CLOSE_TTL, RECENTLY_CLOSED_TTL,
};
pub use domain::trade::{BaseId, Ticket, Trade, TradeAction};

// Application components
pub use application::close_orchestrator::{CloseOrchestrator, CloseOutcome, CloseRequest};
pub use application::error::BridgeError;
pub use application::ports::{CloseNotifier, NullNotifier};
pub use application::queue::{QueueFull, TradeQueue, DEFAULT_QUEUE_CAPACITY};
pub use application::result_ingestor::{ElasticUpdate, HedgeClose, ResultIngestor, TradeResult};
pub use application::status::BridgeStatus;
pub use application::submission::{SubmitOutcome, TradeSubmitter};

// Infrastructure config
pub use infrastructure::config::{BridgeConfig, ConfigError, QueueSettings, ServerSettings};

// Stream fanout (for integration tests)
pub use infrastructure::fanout::{FanoutHub, SharedFanoutHub, StreamKind};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{proto::bridge::v1 as proto, BridgeServer};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    LogFormat, TelemetryConfig, TelemetryGuard, init as init_telemetry,
};
