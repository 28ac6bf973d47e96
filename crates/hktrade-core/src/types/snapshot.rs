//! Venue-reported state and discrepancy records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderStatus, Side, Symbol};

/// A position as the venue reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// An open order as the venue reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrder {
    pub venue_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
}

/// Point-in-time read of venue truth. Never persisted as authoritative
/// ledger state; used only for diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub positions: Vec<VenuePosition>,
    pub open_orders: Vec<VenueOrder>,
    pub taken_at: DateTime<Utc>,
}

impl BrokerSnapshot {
    pub fn new(positions: Vec<VenuePosition>, open_orders: Vec<VenueOrder>) -> Self {
        Self {
            positions,
            open_orders,
            taken_at: Utc::now(),
        }
    }

    /// Venue-reported quantity for a symbol (zero when absent).
    pub fn position_quantity(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .iter()
            .find(|p| &p.symbol == symbol)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn find_position(&self, symbol: &Symbol) -> Option<&VenuePosition> {
        self.positions.iter().find(|p| &p.symbol == symbol)
    }

    pub fn find_open_order(&self, venue_order_id: &str) -> Option<&VenueOrder> {
        self.open_orders
            .iter()
            .find(|o| o.venue_order_id == venue_order_id)
    }
}

/// Kind of ledger/venue mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Ledger holds a position the venue does not report
    PhantomPosition,
    /// Venue reports a position the ledger does not hold
    MissingPosition,
    /// Both sides hold the symbol but quantities differ
    QuantityMismatch,
    /// Ledger believes an order is open but the venue does not report it
    StaleOrder,
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscrepancyKind::PhantomPosition => "phantom position",
            DiscrepancyKind::MissingPosition => "missing position",
            DiscrepancyKind::QuantityMismatch => "quantity mismatch",
            DiscrepancyKind::StaleOrder => "stale order",
        };
        f.write_str(s)
    }
}

/// A detected mismatch between ledger and venue truth. Appended to the
/// audit log even after auto-correction; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub symbol: Option<Symbol>,
    pub order_id: Option<Uuid>,
    pub detail: String,
    pub detected_at: DateTime<Utc>,
    /// How the ledger was corrected, if it was
    pub resolution: Option<String>,
}

impl Discrepancy {
    pub fn position(kind: DiscrepancyKind, symbol: Symbol, detail: impl Into<String>) -> Self {
        Self {
            kind,
            symbol: Some(symbol),
            order_id: None,
            detail: detail.into(),
            detected_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn order(order_id: Uuid, symbol: Symbol, detail: impl Into<String>) -> Self {
        Self {
            kind: DiscrepancyKind::StaleOrder,
            symbol: Some(symbol),
            order_id: Some(order_id),
            detail: detail.into(),
            detected_at: Utc::now(),
            resolution: None,
        }
    }

    pub fn resolved(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Stable key used to recognize the same divergence across passes.
    pub fn strike_key(&self) -> String {
        match (&self.order_id, &self.symbol) {
            (Some(id), _) => format!("order:{id}"),
            (None, Some(sym)) => format!("position:{sym}"),
            (None, None) => "unknown".to_string(),
        }
    }
}
