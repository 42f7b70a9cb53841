//! Bridge Status
//!
//! Lock-free status snapshot read by health checks and the UI shell:
//! connection flags for both counterparties, the platform net position, and
//! the open hedge count. Writers are the RPC adapter (liveness) and the
//! result ingestor (position/hedge accounting).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::domain::trade::TradeAction;

/// Shared liveness and position counters.
#[derive(Debug, Default)]
pub struct BridgeStatus {
    bridge_active: AtomicBool,
    addon_connected: AtomicBool,
    hedgebot_active: AtomicBool,
    net_position: AtomicI64,
    open_hedges: AtomicI64,
}

impl BridgeStatus {
    /// Create a status block with everything inactive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the bridge itself up (gRPC server bound).
    pub fn set_bridge_active(&self, active: bool) {
        self.bridge_active.store(active, Ordering::Relaxed);
    }

    /// Whether the gRPC server is serving.
    #[must_use]
    pub fn is_bridge_active(&self) -> bool {
        self.bridge_active.load(Ordering::Relaxed)
    }

    /// Any upstream (platform addon) traffic proves liveness.
    pub fn set_addon_connected(&self, connected: bool) {
        self.addon_connected.store(connected, Ordering::Relaxed);
    }

    /// Whether the platform addon has shown recent life.
    #[must_use]
    pub fn is_addon_connected(&self) -> bool {
        self.addon_connected.load(Ordering::Relaxed)
    }

    /// Any downstream (executor) traffic proves liveness. The fanout flips
    /// this off when the last downstream stream goes away.
    pub fn set_hedgebot_active(&self, active: bool) {
        let previous = self.hedgebot_active.swap(active, Ordering::Relaxed);
        if previous != active {
            tracing::info!(active, "hedgebot active status changed");
        }
    }

    /// Whether the executor has an active stream or recent traffic.
    #[must_use]
    pub fn is_hedgebot_active(&self) -> bool {
        self.hedgebot_active.load(Ordering::Relaxed)
    }

    /// Adjust the platform net position for an admitted entry.
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_entry(&self, action: TradeAction, quantity: f64) {
        let signed = match action {
            TradeAction::Buy => quantity as i64,
            TradeAction::Sell => -(quantity as i64),
            _ => return,
        };
        self.net_position.fetch_add(signed, Ordering::Relaxed);
    }

    /// Current net platform position.
    #[must_use]
    pub fn net_position(&self) -> i64 {
        self.net_position.load(Ordering::Relaxed)
    }

    /// An executor fill opened a hedge.
    pub fn record_hedge_opened(&self) {
        self.open_hedges.fetch_add(1, Ordering::Relaxed);
    }

    /// An executor result fully closed a hedge.
    pub fn record_hedge_closed(&self) {
        // Results can race restarts; never go negative.
        let _ = self
            .open_hedges
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1).max(0))
            });
    }

    /// Open hedge count expressed as a lot size.
    #[must_use]
    pub fn hedge_size(&self) -> f64 {
        self.open_hedges.load(Ordering::Relaxed) as f64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_move_net_position() {
        let status = BridgeStatus::new();
        status.record_entry(TradeAction::Buy, 2.0);
        status.record_entry(TradeAction::Sell, 1.0);
        assert_eq!(status.net_position(), 1);

        // Non-entry actions leave the position alone.
        status.record_entry(TradeAction::CloseHedge, 5.0);
        assert_eq!(status.net_position(), 1);
    }

    #[test]
    fn hedge_count_never_goes_negative() {
        let status = BridgeStatus::new();
        status.record_hedge_closed();
        assert!((status.hedge_size() - 0.0).abs() < f64::EPSILON);

        status.record_hedge_opened();
        status.record_hedge_opened();
        status.record_hedge_closed();
        assert!((status.hedge_size() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn liveness_flags_toggle() {
        let status = BridgeStatus::new();
        assert!(!status.is_addon_connected());
        status.set_addon_connected(true);
        assert!(status.is_addon_connected());

        status.set_hedgebot_active(true);
        assert!(status.is_hedgebot_active());
        status.set_hedgebot_active(false);
        assert!(!status.is_hedgebot_active());
    }
}
