//! Order types and the per-order state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Symbol;
use crate::error::EngineError;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Get the sign for position calculations (+1 for buy, -1 for sell).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// Execute immediately at best available price
    Market,
    /// Execute at the submitted price or better
    Limit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order status.
///
/// `Created` is the only entry state; `Rejected`, `Filled`, `Cancelled`
/// and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created but not yet sent to the venue
    Created,
    /// Order sent; no acknowledgment received yet
    Submitted,
    /// Venue acknowledged the order and assigned an id
    Acknowledged,
    /// Venue declined the order
    Rejected,
    /// Order partially filled
    PartiallyFilled,
    /// Order completely filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order expired at the venue
    Expired,
}

impl OrderStatus {
    /// Check if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Check if the order is active (can still be filled).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created
                | OrderStatus::Submitted
                | OrderStatus::Acknowledged
                | OrderStatus::PartiallyFilled
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// `Submitted -> Expired` covers reconciliation of an order the venue
    /// never reported back; `PartiallyFilled -> PartiallyFilled` is the
    /// mutable intermediate state for accumulating fills.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Submitted)
                | (Submitted, Acknowledged)
                | (Submitted, Rejected)
                | (Submitted, Expired)
                | (Acknowledged, PartiallyFilled)
                | (Acknowledged, Filled)
                | (Acknowledged, Cancelled)
                | (Acknowledged, Expired)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Expired)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Created => "created",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Acknowledged => "acknowledged",
            OrderStatus::Rejected => "rejected",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A caller-proposed trade. Ephemeral: lives only until the safety gate
/// accepts or rejects it.
///
/// The protective stop is not optional; an intent without one is
/// unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    /// Raw symbol as supplied by the caller (normalized on submit)
    pub symbol: String,
    pub side: Side,
    /// Number of shares; must be a lot-size multiple
    pub quantity: Decimal,
    pub kind: OrderKind,
    /// Limit price (required for limit orders)
    pub limit_price: Option<Decimal>,
    /// Protective stop price
    pub stop_price: Decimal,
    /// Take-profit price
    pub target_price: Option<Decimal>,
    /// Free-text reasoning, kept for the audit trail
    pub justification: String,
}

impl TradeIntent {
    /// Create a market intent.
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            limit_price: None,
            stop_price,
            target_price: None,
            justification: String::new(),
        }
    }

    /// Create a limit intent.
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        limit_price: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Limit,
            limit_price: Some(limit_price),
            stop_price,
            target_price: None,
            justification: String::new(),
        }
    }

    /// Set a take-profit price.
    pub fn with_target(mut self, target: Decimal) -> Self {
        self.target_price = Some(target);
        self
    }

    /// Set the audit justification.
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }
}

/// Linked exit prices attached to an entry order, for venues that enforce
/// the linkage natively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bracket {
    pub stop: Decimal,
    pub target: Option<Decimal>,
}

/// Venue-neutral order submission. Symbol is canonical; the adapter
/// renders its own wire form. Prices are already tick-rounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueOrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub limit_price: Option<Decimal>,
    /// Only set when the venue supports linked orders
    pub bracket: Option<Bracket>,
    /// Client-supplied idempotency token
    pub client_ref: String,
    /// Audit remark forwarded to the venue where supported
    pub remark: String,
}

/// One submission to a venue, tracked from intent to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Internal order id
    pub id: Uuid,
    /// Venue-assigned id; `None` until acknowledgment, write-once after
    venue_order_id: Option<String>,
    /// Canonical symbol
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Tick-rounded price transmitted to the venue (limit orders)
    pub price: Option<Decimal>,
    /// Protective stop carried from the intent
    pub stop_price: Decimal,
    pub target_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub justification: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order from an approved intent. Symbol and prices must
    /// already be normalized.
    pub fn new(
        symbol: Symbol,
        intent: &TradeIntent,
        price: Option<Decimal>,
        stop_price: Decimal,
        target_price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            venue_order_id: None,
            symbol,
            side: intent.side,
            kind: intent.kind,
            quantity: intent.quantity,
            price,
            stop_price,
            target_price,
            status: OrderStatus::Created,
            filled_quantity: Decimal::ZERO,
            filled_avg_price: None,
            justification: intent.justification.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn venue_order_id(&self) -> Option<&str> {
        self.venue_order_id.as_deref()
    }

    /// Record the venue-assigned id. A venue id, once assigned, is never
    /// overwritten.
    pub fn assign_venue_id(&mut self, id: impl Into<String>) -> Result<(), EngineError> {
        if self.venue_order_id.is_some() {
            return Err(EngineError::VenueIdReassigned { order_id: self.id });
        }
        self.venue_order_id = Some(id.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to the next lifecycle state, enforcing the state machine.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Accumulate a fill, moving to `PartiallyFilled` or `Filled`.
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal) -> Result<(), EngineError> {
        let total_qty = self.filled_quantity + quantity;
        let next = if total_qty >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next)?;

        let total_value = self.filled_avg_price.unwrap_or(Decimal::ZERO) * self.filled_quantity
            + price * quantity;
        self.filled_avg_price = Some(total_value / total_qty);
        self.filled_quantity = total_qty;
        Ok(())
    }

    /// Get the remaining quantity to be filled.
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Check if the order can be cancelled (post-acknowledgment only).
    pub fn is_cancelable(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Acknowledged | OrderStatus::PartiallyFilled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(intent: &TradeIntent) -> Order {
        let symbol = Symbol::normalize(&intent.symbol).unwrap();
        Order::new(
            symbol,
            intent,
            intent.limit_price,
            intent.stop_price,
            intent.target_price,
        )
    }

    #[test]
    fn test_entry_state_and_happy_path() {
        let intent = TradeIntent::limit("700", Side::Buy, dec!(100), dec!(378.10), dec!(370));
        let mut o = order(&intent);
        assert_eq!(o.status, OrderStatus::Created);

        o.transition(OrderStatus::Submitted).unwrap();
        o.transition(OrderStatus::Acknowledged).unwrap();
        o.apply_fill(dec!(100), dec!(378.10)).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.filled_avg_price, Some(dec!(378.10)));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let intent = TradeIntent::market("700", Side::Buy, dec!(100), dec!(370));
        let mut o = order(&intent);
        let err = o.transition(OrderStatus::Filled).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_stay_terminal() {
        let intent = TradeIntent::market("700", Side::Buy, dec!(100), dec!(370));
        let mut o = order(&intent);
        o.transition(OrderStatus::Submitted).unwrap();
        o.transition(OrderStatus::Rejected).unwrap();
        assert!(o.status.is_terminal());
        assert!(o.transition(OrderStatus::Acknowledged).is_err());
    }

    #[test]
    fn test_venue_id_write_once() {
        let intent = TradeIntent::market("700", Side::Buy, dec!(100), dec!(370));
        let mut o = order(&intent);
        o.assign_venue_id("FT1001").unwrap();
        let err = o.assign_venue_id("FT1002").unwrap_err();
        assert!(matches!(err, EngineError::VenueIdReassigned { .. }));
        assert_eq!(o.venue_order_id(), Some("FT1001"));
    }

    #[test]
    fn test_partial_fills_accumulate() {
        let intent = TradeIntent::limit("9988", Side::Buy, dec!(400), dec!(80.05), dec!(78));
        let mut o = order(&intent);
        o.transition(OrderStatus::Submitted).unwrap();
        o.transition(OrderStatus::Acknowledged).unwrap();

        o.apply_fill(dec!(100), dec!(80.00)).unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining_quantity(), dec!(300));

        o.apply_fill(dec!(300), dec!(80.10)).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.filled_avg_price, Some(dec!(80.075)));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
