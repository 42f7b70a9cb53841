//! Correlation Store
//!
//! Authoritative map between platform correlation keys (BaseIDs) and
//! executor tickets, plus the short-lived context tables that make close
//! orchestration race-safe: pending close intents, client-initiated marks,
//! elastic close markers, recently-closed tickets, and duplicate trade ids.
//!
//! # Concurrency
//!
//! All state lives behind a single `parking_lot::RwLock`. Mutations take the
//! exclusive lock, reads take the shared lock, and every critical section is
//! O(pool size). The lock is never held across an await point; the bounded
//! wait in [`CorrelationStore::pop_ticket_with_wait`] reacquires it on every
//! poll.
//!
//! # Ticket lifecycle
//!
//! A ticket lives in exactly one of three places: the per-BaseID pool
//! (open, available for allocation), the pending-close table (allocated to a
//! close request awaiting confirmation), or the recently-closed set. The
//! reverse map (`ticket_to_base`) tracks every ticket the executor still
//! holds open, whether pooled or pending, and is the source for
//! [`CorrelationStore::rehydrate_from_reverse_map`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::domain::trade::{is_elastic_reason, BaseId, Ticket};

// =============================================================================
// TTL Constants
// =============================================================================

/// Pending close intents older than this are garbage-collected on read.
pub const PENDING_CLOSE_TTL: Duration = Duration::from_secs(15);

/// Window in which an executor close result is tagged as an acknowledgement
/// of a platform-initiated close.
pub const CLIENT_INITIATED_TTL: Duration = Duration::from_secs(5);

/// Window in which an elastic close marker reclassifies or suppresses the
/// generic close result that follows it.
pub const ELASTIC_MARK_TTL: Duration = Duration::from_secs(3);

/// Window in which a close request for an already-closed ticket is gated.
pub const RECENTLY_CLOSED_TTL: Duration = Duration::from_secs(10);

/// Window in which a duplicate trade id submission is suppressed.
pub const DUPLICATE_ID_TTL: Duration = Duration::from_secs(3);

/// Recently-closed set is pruned when it grows past this size; entries older
/// than the prune age are dropped.
const RECENTLY_CLOSED_PRUNE_THRESHOLD: usize = 1000;
const RECENTLY_CLOSED_PRUNE_AGE: Duration = Duration::from_secs(15);

// =============================================================================
// Records
// =============================================================================

/// A ticket allocated to a close request that has not yet been confirmed.
#[derive(Debug, Clone, Copy)]
pub struct PendingClose {
    /// When the ticket was handed to a close request.
    pub marked_at: Instant,
    /// The allocated ticket.
    pub ticket: Ticket,
}

/// Sizing hint cached from platform entries, used to enrich elastic events.
#[derive(Debug, Clone, Default)]
pub struct ElasticHint {
    /// Platform points lost per 1k account loss.
    pub points_per_1k_loss: f64,
    /// Instrument the hint was recorded for.
    pub instrument: String,
    /// Account the hint was recorded for.
    pub account: String,
}

/// Short-lived marker of the last elastic-origin close event.
#[derive(Debug, Clone)]
pub struct ElasticMark {
    /// Elastic closure reason (`elastic_partial_close`, ...).
    pub reason: String,
    /// When the marker was recorded.
    pub marked_at: Instant,
    /// Ticket the elastic event named; zero when omitted.
    pub ticket: Ticket,
    /// Quantity the elastic event reported.
    pub quantity: f64,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    /// Reverse lookup for every ticket the executor still holds open.
    ticket_to_base: HashMap<Ticket, BaseId>,
    /// Per-BaseID FIFO of open tickets available for allocation.
    ticket_pool: HashMap<BaseId, VecDeque<Ticket>>,
    /// Tickets allocated to in-flight close requests.
    pending_closes: HashMap<BaseId, Vec<PendingClose>>,
    /// Last known instrument per BaseID.
    instrument: HashMap<BaseId, String>,
    /// Last known account per BaseID.
    account: HashMap<BaseId, String>,
    /// Elastic sizing hints per BaseID.
    elastic_hint: HashMap<BaseId, ElasticHint>,
    /// Tickets whose close was requested by the platform.
    client_initiated: HashMap<Ticket, Instant>,
    /// Elastic close markers by BaseID and by ticket.
    recent_elastic_by_base: HashMap<BaseId, ElasticMark>,
    recent_elastic_by_ticket: HashMap<Ticket, ElasticMark>,
    /// Tickets confirmed closed by the executor.
    recently_closed: HashMap<Ticket, Instant>,
    /// Recently admitted trade ids, for duplicate suppression.
    recent_trade_ids: HashMap<String, Instant>,
}

/// Thread-safe correlation state shared by the orchestration components.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    inner: RwLock<StoreInner>,
}

impl CorrelationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Ticket pool
    // =========================================================================

    /// Record an executor fill: append the ticket to the BaseID's pool and
    /// set the reverse mapping. No-op when the (ticket, base) pair is already
    /// recorded.
    ///
    /// Returns the previous BaseID when the ticket was mapped to a different
    /// one, so callers can log the reassignment.
    pub fn record_open(&self, base_id: &str, ticket: Ticket) -> Option<BaseId> {
        let mut inner = self.inner.write();

        let previous = match inner.ticket_to_base.get(&ticket).cloned() {
            Some(existing) if existing == base_id => return None,
            Some(prev) => {
                // Reassignment: drop the ticket from the old pool first.
                Self::remove_from_pool(&mut inner, &prev, ticket);
                Some(prev)
            }
            None => None,
        };

        inner.ticket_to_base.insert(ticket, base_id.to_string());
        let pool = inner.ticket_pool.entry(base_id.to_string()).or_default();
        if !pool.contains(&ticket) {
            pool.push_back(ticket);
        }
        previous
    }

    /// Remove and return the head of the BaseID's ticket pool.
    pub fn pop_ticket(&self, base_id: &str) -> Option<Ticket> {
        let mut inner = self.inner.write();
        let ticket = inner.ticket_pool.get_mut(base_id)?.pop_front();
        if inner
            .ticket_pool
            .get(base_id)
            .is_some_and(VecDeque::is_empty)
        {
            inner.ticket_pool.remove(base_id);
        }
        ticket
    }

    /// Bounded-wait variant of [`Self::pop_ticket`]: polls until a ticket
    /// appears or `max_wait` elapses, releasing the lock between polls.
    /// Every sleep is a cancellation point, so an abandoned request stops
    /// polling within one interval.
    pub async fn pop_ticket_with_wait(
        &self,
        base_id: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Option<Ticket> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(ticket) = self.pop_ticket(base_id) {
                return Some(ticket);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Reinsert a ticket at the head of the pool, rolling back a failed
    /// dispatch. The next allocation receives it first again.
    pub fn push_ticket(&self, base_id: &str, ticket: Ticket) {
        let mut inner = self.inner.write();
        inner.ticket_to_base.insert(ticket, base_id.to_string());
        let pool = inner.ticket_pool.entry(base_id.to_string()).or_default();
        if !pool.contains(&ticket) {
            pool.push_front(ticket);
        }
    }

    /// Remove a specific ticket from the pool. No-op when absent.
    pub fn evict_ticket(&self, base_id: &str, ticket: Ticket) {
        let mut inner = self.inner.write();
        Self::remove_from_pool(&mut inner, base_id, ticket);
    }

    fn remove_from_pool(inner: &mut StoreInner, base_id: &str, ticket: Ticket) {
        let emptied = inner.ticket_pool.get_mut(base_id).is_some_and(|pool| {
            pool.retain(|t| *t != ticket);
            pool.is_empty()
        });
        if emptied {
            inner.ticket_pool.remove(base_id);
        }
    }

    /// Reconstitute pool entries for tickets the reverse map still attributes
    /// to this BaseID but that are missing from both the pool and the
    /// pending table. Returns the restored tickets.
    pub fn rehydrate_from_reverse_map(&self, base_id: &str) -> Vec<Ticket> {
        let mut inner = self.inner.write();
        let now = Instant::now();

        let mapped: Vec<Ticket> = inner
            .ticket_to_base
            .iter()
            .filter(|(_, b)| b.as_str() == base_id)
            .map(|(t, _)| *t)
            .collect();
        if mapped.is_empty() {
            return Vec::new();
        }

        let pending: Vec<Ticket> = inner
            .pending_closes
            .get(base_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|p| now.duration_since(p.marked_at) <= PENDING_CLOSE_TTL)
                    .map(|p| p.ticket)
                    .collect()
            })
            .unwrap_or_default();

        let mut restored = Vec::new();
        {
            let pool = inner.ticket_pool.entry(base_id.to_string()).or_default();
            for ticket in mapped {
                if !pool.contains(&ticket) && !pending.contains(&ticket) {
                    pool.push_back(ticket);
                    restored.push(ticket);
                }
            }
        }
        if inner
            .ticket_pool
            .get(base_id)
            .is_some_and(VecDeque::is_empty)
        {
            inner.ticket_pool.remove(base_id);
        }
        restored
    }

    /// Snapshot of the pool for a BaseID.
    #[must_use]
    pub fn pool_snapshot(&self, base_id: &str) -> Vec<Ticket> {
        self.inner
            .read()
            .ticket_pool
            .get(base_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    /// BaseID the executor reported a ticket under, if still open.
    #[must_use]
    pub fn base_for_ticket(&self, ticket: Ticket) -> Option<BaseId> {
        self.inner.read().ticket_to_base.get(&ticket).cloned()
    }

    // =========================================================================
    // Pending closes
    // =========================================================================

    /// Move a ticket into "awaiting close confirmation". Reinserting an
    /// already-pending ticket refreshes its timestamp.
    pub fn track_pending(&self, base_id: &str, ticket: Ticket) {
        let mut inner = self.inner.write();
        let entries = inner.pending_closes.entry(base_id.to_string()).or_default();
        if let Some(existing) = entries.iter_mut().find(|p| p.ticket == ticket) {
            existing.marked_at = Instant::now();
            return;
        }
        entries.push(PendingClose {
            marked_at: Instant::now(),
            ticket,
        });
    }

    /// True when any pending close for the BaseID is younger than `within`.
    /// Expired entries are garbage-collected as a side effect.
    #[must_use]
    pub fn has_recent_pending(&self, base_id: &str, within: Duration) -> bool {
        let mut inner = self.inner.write();
        Self::gc_pending(&mut inner, base_id);
        inner
            .pending_closes
            .get(base_id)
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|p| p.marked_at.elapsed() <= within)
            })
    }

    /// Open tickets still attributed to the BaseID: pooled plus non-expired
    /// pending.
    #[must_use]
    pub fn open_ticket_count(&self, base_id: &str) -> usize {
        let mut inner = self.inner.write();
        Self::gc_pending(&mut inner, base_id);
        let pooled = inner.ticket_pool.get(base_id).map_or(0, VecDeque::len);
        let pending = inner.pending_closes.get(base_id).map_or(0, Vec::len);
        pooled + pending
    }

    /// Drop all pending close intents for a BaseID. Used when an elastic
    /// partial close supersedes queued intents that would otherwise close
    /// freshly opened tickets.
    pub fn clear_pending(&self, base_id: &str) -> usize {
        self.inner
            .write()
            .pending_closes
            .remove(base_id)
            .map_or(0, |entries| entries.len())
    }

    fn gc_pending(inner: &mut StoreInner, base_id: &str) {
        let emptied = inner.pending_closes.get_mut(base_id).is_some_and(|entries| {
            entries.retain(|p| p.marked_at.elapsed() <= PENDING_CLOSE_TTL);
            entries.is_empty()
        });
        if emptied {
            inner.pending_closes.remove(base_id);
        }
    }

    // =========================================================================
    // Metadata and elastic hints
    // =========================================================================

    /// Upsert last-known instrument/account for a BaseID. Empty values leave
    /// the existing entry untouched.
    pub fn record_metadata(&self, base_id: &str, instrument: &str, account: &str) {
        let mut inner = self.inner.write();
        let instrument = instrument.trim();
        if !instrument.is_empty() {
            inner
                .instrument
                .insert(base_id.to_string(), instrument.to_string());
        }
        let account = account.trim();
        if !account.is_empty() {
            inner.account.insert(base_id.to_string(), account.to_string());
        }
    }

    /// Last known (instrument, account) for a BaseID; empty strings when
    /// unknown.
    #[must_use]
    pub fn metadata(&self, base_id: &str) -> (String, String) {
        let inner = self.inner.read();
        (
            inner.instrument.get(base_id).cloned().unwrap_or_default(),
            inner.account.get(base_id).cloned().unwrap_or_default(),
        )
    }

    /// Cache the elastic sizing hint carried by a platform entry.
    pub fn record_elastic_hint(
        &self,
        base_id: &str,
        points_per_1k_loss: f64,
        instrument: &str,
        account: &str,
    ) {
        if points_per_1k_loss <= 0.0 {
            return;
        }
        self.inner.write().elastic_hint.insert(
            base_id.to_string(),
            ElasticHint {
                points_per_1k_loss,
                instrument: instrument.trim().to_string(),
                account: account.trim().to_string(),
            },
        );
    }

    /// Elastic sizing hint for a BaseID, if one was recorded.
    #[must_use]
    pub fn elastic_hint(&self, base_id: &str) -> Option<ElasticHint> {
        self.inner.read().elastic_hint.get(base_id).cloned()
    }

    // =========================================================================
    // Client-initiated close tracking
    // =========================================================================

    /// Note that the platform requested a close for this ticket.
    pub fn mark_client_initiated(&self, ticket: Ticket) {
        self.inner
            .write()
            .client_initiated
            .insert(ticket, Instant::now());
    }

    /// One-shot check: true (and the mark is consumed) when the ticket was
    /// marked client-initiated within [`CLIENT_INITIATED_TTL`]. The mark is
    /// cleared either way.
    #[must_use]
    pub fn consume_client_initiated(&self, ticket: Ticket) -> bool {
        let mut inner = self.inner.write();
        inner
            .client_initiated
            .remove(&ticket)
            .is_some_and(|marked_at| marked_at.elapsed() <= CLIENT_INITIATED_TTL)
    }

    // =========================================================================
    // Elastic close markers
    // =========================================================================

    /// Record an elastic-origin close marker. Only reasons prefixed with
    /// `elastic_` are accepted.
    pub fn mark_elastic_close(&self, base_id: &str, ticket: Ticket, reason: &str, quantity: f64) {
        if base_id.trim().is_empty() || !is_elastic_reason(reason) {
            return;
        }
        let mut inner = self.inner.write();
        let mark = ElasticMark {
            reason: reason.to_string(),
            marked_at: Instant::now(),
            ticket,
            quantity,
        };
        inner
            .recent_elastic_by_base
            .insert(base_id.to_string(), mark.clone());
        if ticket != 0 {
            inner.recent_elastic_by_ticket.insert(ticket, mark);
        }
    }

    /// Look up a recent elastic marker for the ticket (preferred) or the
    /// BaseID, within the given window. Stale entries are garbage-collected
    /// as a side effect.
    #[must_use]
    pub fn recent_elastic(
        &self,
        base_id: &str,
        ticket: Ticket,
        within: Duration,
    ) -> Option<ElasticMark> {
        let mut inner = self.inner.write();

        let found = if ticket != 0 {
            inner
                .recent_elastic_by_ticket
                .get(&ticket)
                .filter(|m| m.marked_at.elapsed() <= within)
                .cloned()
        } else {
            None
        };
        let found = found.or_else(|| {
            inner
                .recent_elastic_by_base
                .get(base_id)
                .filter(|m| m.marked_at.elapsed() <= within)
                .cloned()
        });

        inner
            .recent_elastic_by_base
            .retain(|_, m| m.marked_at.elapsed() <= within);
        inner
            .recent_elastic_by_ticket
            .retain(|_, m| m.marked_at.elapsed() <= within);

        found
    }

    // =========================================================================
    // Recently-closed tickets and duplicate ids
    // =========================================================================

    /// Record an executor-confirmed close. The set is pruned of entries older
    /// than 15 s once it grows past 1000 tickets.
    pub fn mark_ticket_closed(&self, ticket: Ticket) {
        let mut inner = self.inner.write();
        inner.recently_closed.insert(ticket, Instant::now());
        if inner.recently_closed.len() > RECENTLY_CLOSED_PRUNE_THRESHOLD {
            inner
                .recently_closed
                .retain(|_, at| at.elapsed() <= RECENTLY_CLOSED_PRUNE_AGE);
        }
    }

    /// True when the ticket was confirmed closed within `ttl`.
    #[must_use]
    pub fn was_ticket_recently_closed(&self, ticket: Ticket, ttl: Duration) -> bool {
        let mut inner = self.inner.write();
        match inner.recently_closed.get(&ticket) {
            Some(at) if at.elapsed() <= ttl => true,
            Some(_) => {
                inner.recently_closed.remove(&ticket);
                false
            }
            None => false,
        }
    }

    /// Duplicate-submission guard: returns true when the id was already seen
    /// within `ttl`; otherwise marks it and returns false. Expired entries
    /// are cleaned opportunistically.
    #[must_use]
    pub fn suppress_duplicate_trade_id(&self, id: &str, ttl: Duration) -> bool {
        if id.is_empty() {
            return false;
        }
        let mut inner = self.inner.write();
        inner.recent_trade_ids.retain(|_, at| at.elapsed() <= ttl);
        if inner.recent_trade_ids.contains_key(id) {
            return true;
        }
        inner
            .recent_trade_ids
            .insert(id.to_string(), Instant::now());
        false
    }

    // =========================================================================
    // Close-result pruning
    // =========================================================================

    /// Remove a confirmed-closed ticket from the pool, the reverse map, and
    /// the pending table, and add it to the recently-closed set.
    pub fn prune_closed_ticket(&self, base_id: &str, ticket: Ticket) {
        let mut inner = self.inner.write();
        inner.ticket_to_base.remove(&ticket);
        Self::remove_from_pool(&mut inner, base_id, ticket);
        let emptied = inner.pending_closes.get_mut(base_id).is_some_and(|entries| {
            entries.retain(|p| p.ticket != ticket);
            entries.is_empty()
        });
        if emptied {
            inner.pending_closes.remove(base_id);
        }
        inner.recently_closed.insert(ticket, Instant::now());
    }
}

// =============================================================================
// Tests
// =============================================================================
