//! Trade Event Types
//!
//! The `Trade` record is the single event shape that flows through the
//! bridge: platform entries (BUY/SELL), close requests (CLOSE_HEDGE),
//! enrichment events (EVENT), and executor close notifications
//! (MT5_CLOSE_NOTIFICATION) all use it. The action tag determines which
//! fields are meaningful.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque correlation key assigned by the upstream platform.
pub type BaseId = String;

/// Executor-minted identifier for a filled hedge order. Zero means unknown.
pub type Ticket = u64;

// =============================================================================
// Trade Action
// =============================================================================

/// Lifecycle action carried by a trade event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    /// Platform opened a long position.
    Buy,
    /// Platform opened a short position.
    Sell,
    /// Bridge-issued request for the executor to close a hedge.
    CloseHedge,
    /// Enrichment event forwarded to the executor (e.g. elastic updates).
    Event,
    /// Executor closed a hedge; notification bound for the platform.
    Mt5CloseNotification,
}

impl TradeAction {
    /// Parse an action tag, case-insensitively. Unknown tags are rejected.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "CLOSE_HEDGE" => Some(Self::CloseHedge),
            "EVENT" => Some(Self::Event),
            "MT5_CLOSE_NOTIFICATION" => Some(Self::Mt5CloseNotification),
            _ => None,
        }
    }

    /// Wire representation of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::CloseHedge => "CLOSE_HEDGE",
            Self::Event => "EVENT",
            Self::Mt5CloseNotification => "MT5_CLOSE_NOTIFICATION",
        }
    }

    /// Whether this action opens a position on the platform side.
    #[must_use]
    pub const fn is_entry(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

// =============================================================================
// Order Type Tags
// =============================================================================

/// Order-type tags the bridge writes on events it originates. Entries keep
/// whatever tag the platform submitted.
pub mod order_type {
    /// Platform entry order.
    pub const ENTRY: &str = "ENTRY";
    /// Bridge-issued close request.
    pub const CLOSE: &str = "CLOSE";
    /// Enrichment event.
    pub const EVENT: &str = "EVENT";
    /// Executor-originated (spontaneous) close.
    pub const MT5_CLOSE: &str = "MT5_CLOSE";
    /// Executor close acknowledging a platform-initiated request.
    pub const NT_CLOSE_ACK: &str = "NT_CLOSE_ACK";
}

/// Closure reason applied when an executor result carries no status.
pub const DEFAULT_CLOSURE_REASON: &str = "MT5_position_closed";

/// Prefix identifying elastic (profit-management) closure reasons.
pub const ELASTIC_REASON_PREFIX: &str = "elastic_";

/// Elastic partial close: the position stays open with reduced volume.
pub const ELASTIC_PARTIAL_CLOSE: &str = "elastic_partial_close";

/// Event type attached to elastic enrichment events.
pub const ELASTIC_EVENT_TYPE: &str = "elastic_hedge_update";

/// True for closure reasons describing an elastic profit-management action.
#[must_use]
pub fn is_elastic_reason(reason: &str) -> bool {
    reason
        .trim()
        .to_lowercase()
        .starts_with(ELASTIC_REASON_PREFIX)
}

// =============================================================================
// Trade Record
// =============================================================================

/// A trade lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Canonical deduplication key.
    pub id: String,
    /// Correlation key for the logical position.
    pub base_id: BaseId,
    /// Event time.
    pub time: DateTime<Utc>,
    /// Lifecycle action.
    pub action: TradeAction,
    /// Contract quantity; passthrough for entries, 1 for closes.
    pub quantity: f64,
    /// Fill price; zero on bridge-originated events.
    pub price: f64,
    /// Total contracts in the trade group.
    pub total_quantity: i32,
    /// Which contract this is (1-based).
    pub contract_num: i32,
    /// Passthrough order tag; see [`order_type`].
    pub order_type: String,
    /// Instrument symbol.
    pub instrument: String,
    /// Platform account name.
    pub account: String,
    /// Executor ticket; zero when not yet known.
    pub mt5_ticket: Ticket,
    /// Elastic sizing hint supplied on entries, echoed on events.
    pub nt_points_per_1k_loss: f64,
    /// Event payload, set on EVENT trades.
    pub event_type: String,
    /// Current profit reported with an elastic event.
    pub elastic_current_profit: f64,
    /// Profit level reported with an elastic event.
    pub elastic_profit_level: i32,
    /// Set on MT5_CLOSE_NOTIFICATION trades.
    pub closure_reason: String,
}

impl Trade {
    /// Build a CLOSE_HEDGE request carrying an explicit executor ticket.
    #[must_use]
    pub fn close_hedge(base_id: &str, ticket: Ticket, instrument: &str, account: &str) -> Self {
        Self {
            id: format!("close_{}", unique_nanos()),
            base_id: base_id.to_string(),
            time: Utc::now(),
            action: TradeAction::CloseHedge,
            quantity: 1.0,
            price: 0.0,
            total_quantity: 1,
            contract_num: 1,
            order_type: order_type::CLOSE.to_string(),
            instrument: instrument.to_string(),
            account: account.to_string(),
            mt5_ticket: ticket,
            nt_points_per_1k_loss: 0.0,
            event_type: String::new(),
            elastic_current_profit: 0.0,
            elastic_profit_level: 0,
            closure_reason: String::new(),
        }
    }

    /// Build an executor close notification bound for upstream streams.
    #[must_use]
    pub fn close_notification(
        id: String,
        base_id: &str,
        ticket: Ticket,
        quantity: f64,
        order_type_tag: &str,
        closure_reason: &str,
        instrument: &str,
        account: &str,
    ) -> Self {
        Self {
            id,
            base_id: base_id.to_string(),
            time: Utc::now(),
            action: TradeAction::Mt5CloseNotification,
            quantity,
            price: 0.0,
            total_quantity: quantity.max(1.0) as i32,
            contract_num: 1,
            order_type: order_type_tag.to_string(),
            instrument: instrument.to_string(),
            account: account.to_string(),
            mt5_ticket: ticket,
            nt_points_per_1k_loss: 0.0,
            event_type: String::new(),
            elastic_current_profit: 0.0,
            elastic_profit_level: 0,
            closure_reason: closure_reason.to_string(),
        }
    }

    /// Build an elastic enrichment EVENT trade.
    #[must_use]
    pub fn elastic_event(
        base_id: &str,
        ticket: Ticket,
        current_profit: f64,
        profit_level: i32,
        nt_points_per_1k_loss: f64,
        instrument: &str,
        account: &str,
    ) -> Self {
        Self {
            id: format!("elastic_evt_{}", unique_nanos()),
            base_id: base_id.to_string(),
            time: Utc::now(),
            action: TradeAction::Event,
            quantity: 0.0,
            price: 0.0,
            total_quantity: 0,
            contract_num: 0,
            order_type: order_type::EVENT.to_string(),
            instrument: instrument.to_string(),
            account: account.to_string(),
            mt5_ticket: ticket,
            nt_points_per_1k_loss,
            event_type: ELASTIC_EVENT_TYPE.to_string(),
            elastic_current_profit: current_profit,
            elastic_profit_level: profit_level,
            closure_reason: String::new(),
        }
    }
}

// =============================================================================
// Normalization Helpers
// =============================================================================

/// Derive the canonical trade id: platform id first, then the base id, then a
/// time-based unique fallback.
#[must_use]
pub fn normalize_trade_id(platform_id: &str, base_id: &str) -> String {
    let id = platform_id.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    let base = base_id.trim();
    if !base.is_empty() {
        return base.to_string();
    }
    format!("trade_{}", unique_nanos())
}

/// Interpret a wire timestamp in seconds since epoch; zero means "now".
#[must_use]
pub fn normalize_timestamp(seconds: i64) -> DateTime<Utc> {
    if seconds <= 0 {
        return Utc::now();
    }
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

/// Nanosecond timestamp used for generated event ids.
fn unique_nanos() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1_000))
}

// =============================================================================
// Tests
// =============================================================================
