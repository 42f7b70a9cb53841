// @generated
// This file is @generated by prost-build.
/// Trade lifecycle event exchanged between the platform addon, the bridge,
/// and the hedge executor. One message shape serves entries (BUY/SELL),
/// close requests (CLOSE_HEDGE), enrichment events (EVENT), and close
/// notifications (MT5_CLOSE_NOTIFICATION).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trade {
    /// Canonical deduplication key. Prefers the platform trade id, then the
    /// base id, then a time-based unique string.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Opaque correlation key for the logical position.
    #[prost(string, tag = "2")]
    pub base_id: ::prost::alloc::string::String,
    /// Seconds since epoch; zero means "now".
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    /// BUY | SELL | CLOSE_HEDGE | EVENT | MT5_CLOSE_NOTIFICATION.
    #[prost(string, tag = "4")]
    pub action: ::prost::alloc::string::String,
    #[prost(double, tag = "5")]
    pub quantity: f64,
    #[prost(double, tag = "6")]
    pub price: f64,
    #[prost(int32, tag = "7")]
    pub total_quantity: i32,
    #[prost(int32, tag = "8")]
    pub contract_num: i32,
    /// ENTRY | CLOSE | EVENT | MT5_CLOSE | NT_CLOSE_ACK.
    #[prost(string, tag = "9")]
    pub order_type: ::prost::alloc::string::String,
    #[prost(string, tag = "10")]
    pub instrument: ::prost::alloc::string::String,
    #[prost(string, tag = "11")]
    pub account_name: ::prost::alloc::string::String,
    /// Executor position ticket; zero when unknown.
    #[prost(uint64, tag = "12")]
    pub mt5_ticket: u64,
    /// Elastic sizing hint supplied on entries.
    #[prost(double, tag = "13")]
    pub nt_points_per_1k_loss: f64,
    /// Enrichment payload for EVENT trades.
    #[prost(string, tag = "14")]
    pub event_type: ::prost::alloc::string::String,
    #[prost(double, tag = "15")]
    pub elastic_current_profit: f64,
    #[prost(int32, tag = "16")]
    pub elastic_profit_level: i32,
    /// Set on MT5_CLOSE_NOTIFICATION events.
    #[prost(string, tag = "17")]
    pub closure_reason: ::prost::alloc::string::String,
}
/// Executor fill/close result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Mt5TradeResult {
    #[prost(string, tag = "1")]
    pub status: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub ticket: u64,
    #[prost(double, tag = "3")]
    pub volume: f64,
    #[prost(bool, tag = "4")]
    pub is_close: bool,
    /// BaseID the result correlates to.
    #[prost(string, tag = "5")]
    pub id: ::prost::alloc::string::String,
}
/// Hedge close intent or notification, in either direction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HedgeCloseNotification {
    #[prost(string, tag = "1")]
    pub base_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub instrument: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub account_name: ::prost::alloc::string::String,
    #[prost(double, tag = "4")]
    pub quantity: f64,
    /// MT5_position_closed | MT5_stop_loss | MT5_take_profit |
    /// MT5_manual_close | elastic_partial_close | elastic_completion | ...
    #[prost(string, tag = "5")]
    pub closure_reason: ::prost::alloc::string::String,
    #[prost(uint64, tag = "6")]
    pub mt5_ticket: u64,
    #[prost(int64, tag = "7")]
    pub timestamp: i64,
}
/// Executor-side profit management update.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ElasticHedgeUpdate {
    #[prost(string, tag = "1")]
    pub base_id: ::prost::alloc::string::String,
    #[prost(double, tag = "2")]
    pub current_profit: f64,
    #[prost(int32, tag = "3")]
    pub profit_level: i32,
    #[prost(uint64, tag = "4")]
    pub mt5_ticket: u64,
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenericResponse {
    #[prost(string, tag = "1")]
    pub status: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "3")]
    pub metadata: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthRequest {
    #[prost(string, tag = "1")]
    pub source: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthResponse {
    #[prost(string, tag = "1")]
    pub status: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub queue_size: i32,
    #[prost(int32, tag = "3")]
    pub net_position: i32,
    #[prost(double, tag = "4")]
    pub hedge_size: f64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeartbeatRequest {
    #[prost(string, tag = "1")]
    pub component: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeartbeatResponse {
    #[prost(string, tag = "1")]
    pub status: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}
/// Structured client log event forwarded into the bridge log pipeline.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEvent {
    #[prost(int64, tag = "1")]
    pub timestamp_ns: i64,
    #[prost(string, tag = "2")]
    pub source: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub level: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub component: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub base_id: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub trade_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "8")]
    pub mt5_ticket: u64,
    #[prost(string, tag = "9")]
    pub error_code: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "10")]
    pub tags: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
}
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct LogAck {
    #[prost(uint32, tag = "1")]
    pub accepted: u32,
    #[prost(uint32, tag = "2")]
    pub dropped: u32,
}
include!("bridge.v1.tonic.rs");
// @@protoc_insertion_point(module)
