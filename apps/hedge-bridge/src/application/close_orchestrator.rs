//! Close Orchestration
//!
//! Turns a platform close-hedge intent into exactly one dispatched
//! CLOSE_HEDGE per request. One close request corresponds to one downstream
//! hedge; the request's quantity field is ignored because the platform
//! guarantees one logical position per BaseID.
//!
//! The bounded wait absorbs the common race where the close request arrives
//! microseconds before the executor's fill confirmation. The rehydrate step
//! covers pools drained by a previous partial close while the reverse map
//! still shows open tickets. The idempotency rules make retries safe.

use std::sync::Arc;
use std::time::Duration;

use crate::application::error::BridgeError;
use crate::application::queue::TradeQueue;
use crate::domain::correlation::CorrelationStore;
use crate::domain::trade::{Ticket, Trade};

/// Upper bound on waiting for a ticket to materialize.
pub const CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a ticket.
pub const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Window in which an in-flight pending close makes a second request
/// idempotent.
pub const RECENT_PENDING_WINDOW: Duration = Duration::from_secs(2);

/// A platform close-hedge intent.
#[derive(Debug, Clone, Default)]
pub struct CloseRequest {
    /// Correlation key of the position to close.
    pub base_id: String,
    /// Instrument, recorded as metadata for later enrichment.
    pub instrument: String,
    /// Account, recorded as metadata for later enrichment.
    pub account: String,
    /// Explicit executor ticket; zero requests pool allocation.
    pub ticket: Ticket,
}

/// How a close request resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A CLOSE_HEDGE was dispatched carrying this ticket.
    Dispatched(Ticket),
    /// A close for this BaseID is already in flight; treated as a duplicate.
    AlreadyInFlight,
    /// Nothing is open for this BaseID; the request is idempotently
    /// satisfied.
    NothingOpen,
}

/// Dispatches close requests against the correlation store.
pub struct CloseOrchestrator {
    store: Arc<CorrelationStore>,
    queue: Arc<TradeQueue>,
}

impl CloseOrchestrator {
    /// Create an orchestrator over the shared core state.
    #[must_use]
    pub fn new(store: Arc<CorrelationStore>, queue: Arc<TradeQueue>) -> Self {
        Self { store, queue }
    }

    /// Resolve a close intent to at most one dispatched CLOSE_HEDGE.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidInput`] when the BaseID is empty.
    /// - [`BridgeError::NoTicketsAvailable`] when no ticket materialized
    ///   within the bounded wait and no idempotency rule applied.
    /// - [`BridgeError::EnqueueFailed`] when the queue rejected the dispatch;
    ///   the allocated ticket was pushed back into the pool.
    pub async fn close_hedge(&self, request: CloseRequest) -> Result<CloseOutcome, BridgeError> {
        let base_id = request.base_id.trim().to_string();
        if base_id.is_empty() {
            return Err(BridgeError::InvalidInput(
                "close request missing base_id".to_string(),
            ));
        }
        self.store
            .record_metadata(&base_id, &request.instrument, &request.account);

        if request.ticket != 0 {
            return self.close_explicit_ticket(&base_id, &request);
        }
        self.close_from_pool(&base_id, &request).await
    }

    /// Explicit-ticket path: the platform already knows which executor
    /// position to close. No waiting, no fallback.
    fn close_explicit_ticket(
        &self,
        base_id: &str,
        request: &CloseRequest,
    ) -> Result<CloseOutcome, BridgeError> {
        let ticket = request.ticket;
        tracing::info!(
            base_id,
            mt5_ticket = ticket,
            "close request carries explicit ticket; dispatching targeted CLOSE_HEDGE"
        );

        self.store.evict_ticket(base_id, ticket);
        let trade = Trade::close_hedge(base_id, ticket, &request.instrument, &request.account);
        if let Err(err) = self.queue.enqueue(trade) {
            self.store.push_ticket(base_id, ticket);
            return Err(BridgeError::EnqueueFailed(err.to_string()));
        }
        self.store.track_pending(base_id, ticket);
        self.store.mark_client_initiated(ticket);
        Ok(CloseOutcome::Dispatched(ticket))
    }

    /// Pool path: allocate the FIFO head, waiting briefly for a fill that
    /// may still be in flight.
    async fn close_from_pool(
        &self,
        base_id: &str,
        request: &CloseRequest,
    ) -> Result<CloseOutcome, BridgeError> {
        let mut ticket = self
            .store
            .pop_ticket_with_wait(base_id, CLOSE_WAIT, CLOSE_POLL_INTERVAL)
            .await;

        if ticket.is_none() {
            let restored = self.store.rehydrate_from_reverse_map(base_id);
            if !restored.is_empty() {
                tracing::info!(
                    base_id,
                    restored = restored.len(),
                    "rehydrated tickets from reverse map after empty pool"
                );
            }
            ticket = self.store.pop_ticket(base_id);
        }

        let Some(ticket) = ticket else {
            if self
                .store
                .has_recent_pending(base_id, RECENT_PENDING_WINDOW)
            {
                tracing::info!(
                    base_id,
                    "close already in flight; treating request as duplicate"
                );
                return Ok(CloseOutcome::AlreadyInFlight);
            }
            if self.store.open_ticket_count(base_id) == 0 {
                tracing::info!(base_id, "no open tickets; close is idempotently satisfied");
                return Ok(CloseOutcome::NothingOpen);
            }
            tracing::warn!(base_id, "no ticket materialized within the bounded wait");
            return Err(BridgeError::NoTicketsAvailable(base_id.to_string()));
        };

        let trade = Trade::close_hedge(base_id, ticket, &request.instrument, &request.account);
        if let Err(err) = self.queue.enqueue(trade) {
            // Roll back so the ticket is allocated to the next request.
            self.store.push_ticket(base_id, ticket);
            tracing::warn!(
                base_id,
                mt5_ticket = ticket,
                "failed to enqueue CLOSE_HEDGE; ticket returned to pool"
            );
            return Err(BridgeError::EnqueueFailed(err.to_string()));
        }
        self.store.track_pending(base_id, ticket);
        self.store.mark_client_initiated(ticket);
        tracing::info!(base_id, mt5_ticket = ticket, "dispatched CLOSE_HEDGE");
        Ok(CloseOutcome::Dispatched(ticket))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeAction;

    fn orchestrator() -> (CloseOrchestrator, Arc<CorrelationStore>, Arc<TradeQueue>) {
        let store = Arc::new(CorrelationStore::new());
        let queue = Arc::new(TradeQueue::with_defaults());
        (
            CloseOrchestrator::new(Arc::clone(&store), Arc::clone(&queue)),
            store,
            queue,
        )
    }

    fn request(base_id: &str) -> CloseRequest {
        CloseRequest {
            base_id: base_id.to_string(),
            instrument: "NQ".to_string(),
            account: "Sim101".to_string(),
            ticket: 0,
        }
    }

    #[tokio::test]
    async fn empty_base_id_is_invalid() {
        let (orchestrator, _store, _queue) = orchestrator();
        let err = orchestrator.close_hedge(request("  ")).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn pooled_ticket_is_dispatched_fifo() {
        let (orchestrator, store, queue) = orchestrator();
        store.record_open("B1", 101);
        store.record_open("B1", 102);

        let outcome = orchestrator.close_hedge(request("B1")).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Dispatched(101));

        let trade = queue.poll().unwrap();
        assert_eq!(trade.action, TradeAction::CloseHedge);
        assert_eq!(trade.mt5_ticket, 101);
        assert_eq!(trade.base_id, "B1");

        // The dispatched ticket is pending, not pooled.
        assert_eq!(store.pool_snapshot("B1"), vec![102]);
        assert_eq!(store.open_ticket_count("B1"), 2);
    }

    #[tokio::test]
    async fn explicit_ticket_skips_pool_allocation() {
        let (orchestrator, store, queue) = orchestrator();
        store.record_open("B1", 101);
        store.record_open("B1", 102);

        let outcome = orchestrator
            .close_hedge(CloseRequest {
                ticket: 102,
                ..request("B1")
            })
            .await
            .unwrap();
        assert_eq!(outcome, CloseOutcome::Dispatched(102));
        assert_eq!(queue.poll().unwrap().mt5_ticket, 102);
        assert_eq!(store.pool_snapshot("B1"), vec![101]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_before_fill_waits_for_ticket() {
        let (orchestrator, store, queue) = orchestrator();
        let store_clone = Arc::clone(&store);

        let fill = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            store_clone.record_open("B2", 202);
        });

        let outcome = orchestrator.close_hedge(request("B2")).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Dispatched(202));
        assert_eq!(queue.poll().unwrap().mt5_ticket, 202);
        fill.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_base_is_idempotently_satisfied() {
        let (orchestrator, _store, queue) = orchestrator();
        let outcome = orchestrator.close_hedge(request("B9")).await.unwrap();
        assert_eq!(outcome, CloseOutcome::NothingOpen);
        assert!(queue.poll().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn second_close_during_flight_is_duplicate() {
        let (orchestrator, store, queue) = orchestrator();
        store.record_open("B1", 101);

        let first = orchestrator.close_hedge(request("B1")).await.unwrap();
        assert_eq!(first, CloseOutcome::Dispatched(101));
        let _ = queue.poll();

        let second = orchestrator.close_hedge(request("B1")).await.unwrap();
        assert_eq!(second, CloseOutcome::AlreadyInFlight);
        assert!(queue.poll().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rehydrate_covers_drained_pool() {
        let (orchestrator, store, queue) = orchestrator();
        store.record_open("B1", 101);
        // Pool drained without confirmation; reverse map still attributes
        // the ticket to this base.
        assert_eq!(store.pop_ticket("B1"), Some(101));

        let outcome = orchestrator.close_hedge(request("B1")).await.unwrap();
        assert_eq!(outcome, CloseOutcome::Dispatched(101));
        assert_eq!(queue.poll().unwrap().mt5_ticket, 101);
    }

    #[tokio::test]
    async fn enqueue_failure_rolls_the_ticket_back() {
        let store = Arc::new(CorrelationStore::new());
        let queue = Arc::new(TradeQueue::new(0));
        let orchestrator = CloseOrchestrator::new(Arc::clone(&store), queue);
        store.record_open("B1", 101);

        let err = orchestrator.close_hedge(request("B1")).await.unwrap_err();
        assert!(matches!(err, BridgeError::EnqueueFailed(_)));
        assert_eq!(store.pool_snapshot("B1"), vec![101]);
    }
}
