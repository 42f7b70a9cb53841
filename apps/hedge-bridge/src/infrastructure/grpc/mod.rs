//! gRPC Services
//!
//! Thin translators between the `bridge.v1` wire schema and the typed core
//! events. Each RPC converts its protobuf message into exactly one core
//! event; the core never sees wire types.
//!
//! # Streams
//!
//! - `TradingService/GetTrades` (bidirectional): executor-facing. Inbound
//!   health pings prove liveness; outbound carries the trade queue via a
//!   per-stream forwarding loop.
//! - `StreamingService/TradingStream` (bidirectional): platform-facing.
//!   Inbound trade submissions are admitted like unary submissions;
//!   outbound carries executor close notifications only.

pub mod server;

/// Include generated protobuf code.
/// The generated code is in packages/schema-gen/rust/bridge/v1/
/// bridge.v1.rs includes bridge.v1.tonic.rs at the end
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod bridge {
        pub mod v1 {
            include!("../../../../../packages/schema-gen/rust/bridge/v1/bridge.v1.rs");
        }
    }
}

pub use server::BridgeServer;
