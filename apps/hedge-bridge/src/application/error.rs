//! Bridge Error Taxonomy
//!
//! Errors surfaced by the orchestration layer to the RPC adapter. Internal
//! conditions (stale closes, duplicate submissions) are handled locally and
//! never appear here: stale closes are dropped by the fanout, duplicates are
//! reported to callers as success.

use thiserror::Error;
use tonic::Code;

/// Errors the core reports to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Missing BaseID or malformed event. No state was changed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Admission control rejected the event; the caller may retry or drop.
    #[error("trade queue is full")]
    QueueFull,

    /// A close was requested but no ticket materialized within the bounded
    /// wait and no idempotency rule applied.
    #[error("no tickets available for base_id {0}")]
    NoTicketsAvailable(String),

    /// Transient enqueue failure; allocated state was rolled back.
    #[error("failed to enqueue trade: {0}")]
    EnqueueFailed(String),
}

impl BridgeError {
    /// gRPC status code for this error.
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        match self {
            Self::InvalidInput(_) => Code::InvalidArgument,
            Self::QueueFull => Code::ResourceExhausted,
            Self::NoTicketsAvailable(_) => Code::FailedPrecondition,
            Self::EnqueueFailed(_) => Code::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_grpc_codes() {
        assert_eq!(
            BridgeError::InvalidInput("x".into()).grpc_code(),
            Code::InvalidArgument
        );
        assert_eq!(BridgeError::QueueFull.grpc_code(), Code::ResourceExhausted);
        assert_eq!(
            BridgeError::NoTicketsAvailable("b".into()).grpc_code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            BridgeError::EnqueueFailed("full".into()).grpc_code(),
            Code::Unavailable
        );
    }
}
