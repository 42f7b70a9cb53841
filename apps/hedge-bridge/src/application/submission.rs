//! Trade Submission
//!
//! Admission path for platform-originated trade events, shared by the unary
//! `SubmitTrade` RPC and the upstream bidirectional stream. Applies
//! duplicate suppression, records correlation metadata for entries, and
//! enqueues the event for the executor.

use std::sync::Arc;

use crate::application::error::BridgeError;
use crate::application::queue::TradeQueue;
use crate::application::status::BridgeStatus;
use crate::domain::correlation::{CorrelationStore, DUPLICATE_ID_TTL};
use crate::domain::trade::Trade;

/// What happened to a submitted trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted to the outbound queue.
    Queued,
    /// The id was seen recently; reported as success with no state change.
    DuplicateSuppressed,
}

/// Admits platform trade events into the outbound queue.
pub struct TradeSubmitter {
    store: Arc<CorrelationStore>,
    queue: Arc<TradeQueue>,
    status: Arc<BridgeStatus>,
}

impl TradeSubmitter {
    /// Create a submitter over the shared core state.
    #[must_use]
    pub fn new(
        store: Arc<CorrelationStore>,
        queue: Arc<TradeQueue>,
        status: Arc<BridgeStatus>,
    ) -> Self {
        Self {
            store,
            queue,
            status,
        }
    }

    /// Admit a trade event.
    ///
    /// Duplicate ids within the suppression window are dropped and reported
    /// as success. Entries (BUY/SELL) record instrument/account metadata and
    /// the elastic sizing hint before enqueueing.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::QueueFull`] when admission control rejects the
    /// event.
    pub fn submit(&self, trade: Trade) -> Result<SubmitOutcome, BridgeError> {
        if self
            .store
            .suppress_duplicate_trade_id(&trade.id, DUPLICATE_ID_TTL)
        {
            tracing::info!(trade_id = %trade.id, "skipping duplicate trade submission");
            return Ok(SubmitOutcome::DuplicateSuppressed);
        }

        let base_id = trade.base_id.trim();
        if trade.action.is_entry() && !base_id.is_empty() {
            self.store
                .record_metadata(base_id, &trade.instrument, &trade.account);
            if trade.nt_points_per_1k_loss > 0.0 {
                self.store.record_elastic_hint(
                    base_id,
                    trade.nt_points_per_1k_loss,
                    &trade.instrument,
                    &trade.account,
                );
            }
            self.status.record_entry(trade.action, trade.quantity);
        }

        self.queue.enqueue(trade).map_err(|_| BridgeError::QueueFull)?;
        Ok(SubmitOutcome::Queued)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trade::TradeAction;
    use chrono::Utc;

    fn entry_trade(id: &str, base_id: &str, action: TradeAction) -> Trade {
        Trade {
            id: id.to_string(),
            base_id: base_id.to_string(),
            time: Utc::now(),
            action,
            quantity: 1.0,
            price: 19250.0,
            total_quantity: 1,
            contract_num: 1,
            order_type: "ENTRY".to_string(),
            instrument: "NQ".to_string(),
            account: "Sim101".to_string(),
            mt5_ticket: 0,
            nt_points_per_1k_loss: 85.0,
            event_type: String::new(),
            elastic_current_profit: 0.0,
            elastic_profit_level: 0,
            closure_reason: String::new(),
        }
    }

    fn submitter() -> (TradeSubmitter, Arc<CorrelationStore>, Arc<TradeQueue>) {
        let store = Arc::new(CorrelationStore::new());
        let queue = Arc::new(TradeQueue::with_defaults());
        let status = Arc::new(BridgeStatus::new());
        (
            TradeSubmitter::new(Arc::clone(&store), Arc::clone(&queue), status),
            store,
            queue,
        )
    }

    #[test]
    fn entry_records_metadata_and_hint() {
        let (submitter, store, queue) = submitter();
        let outcome = submitter
            .submit(entry_trade("T1", "B1", TradeAction::Buy))
            .unwrap();

        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(queue.len(), 1);
        assert_eq!(store.metadata("B1"), ("NQ".to_string(), "Sim101".to_string()));
        let hint = store.elastic_hint("B1").unwrap();
        assert!((hint.points_per_1k_loss - 85.0).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_id_yields_single_emission() {
        let (submitter, _store, queue) = submitter();
        submitter
            .submit(entry_trade("T1", "B5", TradeAction::Buy))
            .unwrap();
        let second = submitter
            .submit(entry_trade("T1", "B5", TradeAction::Buy))
            .unwrap();

        assert_eq!(second, SubmitOutcome::DuplicateSuppressed);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_full_surfaces_to_caller() {
        let store = Arc::new(CorrelationStore::new());
        let queue = Arc::new(TradeQueue::new(1));
        let status = Arc::new(BridgeStatus::new());
        let submitter = TradeSubmitter::new(store, Arc::clone(&queue), status);

        submitter
            .submit(entry_trade("T1", "B1", TradeAction::Buy))
            .unwrap();
        let err = submitter
            .submit(entry_trade("T2", "B1", TradeAction::Buy))
            .unwrap_err();
        assert_eq!(err, BridgeError::QueueFull);
    }
}
