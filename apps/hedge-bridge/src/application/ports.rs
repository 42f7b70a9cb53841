//! Application Ports
//!
//! Interfaces the orchestration layer needs from the outside world. The
//! fanout adapter implements them; tests substitute recording fakes.

use crate::domain::trade::Trade;

/// Sink for executor close notifications bound for upstream streams.
///
/// Delivery is non-blocking and best-effort: the bridge's correctness does
/// not depend on any individual stream accepting the event.
pub trait CloseNotifier: Send + Sync {
    /// Fan a close notification out to upstream-bound streams only.
    fn notify_upstream(&self, trade: Trade);
}

/// No-op notifier for contexts with no upstream streams (tests, tooling).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl CloseNotifier for NullNotifier {
    fn notify_upstream(&self, _trade: Trade) {}
}
