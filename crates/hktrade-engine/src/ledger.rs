//! The internal order and position ledger.
//!
//! The ledger is never authoritative over the venue for position
//! existence: only the reconciler corrects it, and only from a fresh
//! snapshot. Orders are retained after reaching a terminal state for
//! audit; the discrepancy log is append-only.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use hktrade_core::error::EngineError;
use hktrade_core::types::{
    Discrepancy, Order, OrderStatus, Position, Symbol, VenueOrder,
};

/// What a fill did to the ledger, reported back so the caller can update
/// supervision without holding the ledger lock.
#[derive(Debug, Clone)]
pub struct FillEffect {
    pub symbol: Symbol,
    pub order_status: OrderStatus,
    /// Signed position quantity after the fill
    pub position_quantity: Decimal,
    pub stop_price: Decimal,
    pub target_price: Option<Decimal>,
    pub realized_pnl: Decimal,
}

impl FillEffect {
    pub fn position_flat(&self) -> bool {
        self.position_quantity == Decimal::ZERO
    }
}

/// Internal record of orders and positions.
#[derive(Debug, Default)]
pub struct Ledger {
    orders: HashMap<Uuid, Order>,
    positions: HashMap<Symbol, Position>,
    discrepancies: Vec<Discrepancy>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // --- orders ---------------------------------------------------------

    pub fn insert_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn order_mut(&mut self, id: Uuid) -> Option<&mut Order> {
        self.orders.get_mut(&id)
    }

    /// Orders still in a non-terminal state.
    pub fn active_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| o.status.is_active()).collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // --- positions ------------------------------------------------------

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn insert_position(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn remove_position(&mut self, symbol: &Symbol) -> Option<Position> {
        self.positions.remove(symbol)
    }

    /// Overwrite a position's quantity from venue truth, keeping its
    /// protective stop. Zero removes the position.
    pub fn set_position_quantity(&mut self, symbol: &Symbol, quantity: Decimal) {
        if quantity == Decimal::ZERO {
            self.positions.remove(symbol);
        } else if let Some(position) = self.positions.get_mut(symbol) {
            position.quantity = quantity;
        }
    }

    // --- fills ----------------------------------------------------------

    /// Apply a fill to an order and flow it into the position for that
    /// symbol. Creates the position on an entry fill, carrying the
    /// order's protective stop; removes it when quantity returns to zero.
    pub fn apply_order_fill(
        &mut self,
        order_id: Uuid,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<FillEffect, EngineError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;
        order.apply_fill(quantity, price)?;

        let symbol = order.symbol.clone();
        let side = order.side;
        let stop_price = order.stop_price;
        let target_price = order.target_price;
        let order_status = order.status;

        let position = self.positions.entry(symbol.clone()).or_insert_with(|| {
            Position::new(symbol.clone(), Decimal::ZERO, price, stop_price, target_price)
        });
        if !position.order_ids.contains(&order_id) {
            position.order_ids.push(order_id);
        }
        let realized_pnl = position.apply_fill(side, quantity, price);
        let position_quantity = position.quantity;
        let stop_price = position.stop_price;
        let target_price = position.target_price;

        if position_quantity == Decimal::ZERO {
            self.positions.remove(&symbol);
        }

        Ok(FillEffect {
            symbol,
            order_status,
            position_quantity,
            stop_price,
            target_price,
            realized_pnl,
        })
    }

    /// Fold the venue's view of an order into the ledger: new fills are
    /// applied, terminal venue states close the order out. Returns the
    /// fill effect when quantity changed.
    pub fn absorb_venue_order(
        &mut self,
        order_id: Uuid,
        venue_order: &VenueOrder,
    ) -> Result<Option<FillEffect>, EngineError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;

        if order.status.is_terminal() {
            return Ok(None);
        }

        // An order found at the venue while the ledger still says
        // Submitted was acknowledged; catch the ledger up first.
        if order.status == OrderStatus::Submitted {
            if order.venue_order_id().is_none() {
                order.assign_venue_id(venue_order.venue_order_id.clone())?;
            }
            order.transition(OrderStatus::Acknowledged)?;
        }

        let delta = venue_order.filled_quantity - order.filled_quantity;
        let mut effect = None;
        if delta > Decimal::ZERO {
            let price = venue_order
                .filled_avg_price
                .or(venue_order.price)
                .unwrap_or(Decimal::ZERO);
            effect = Some(self.apply_order_fill(order_id, delta, price)?);
        }

        // Re-borrow: apply_order_fill released the order borrow.
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::UnknownOrder(order_id))?;
        if !order.status.is_terminal() {
            match venue_order.status {
                OrderStatus::Cancelled => order.transition(OrderStatus::Cancelled)?,
                OrderStatus::Expired => order.transition(OrderStatus::Expired)?,
                OrderStatus::Rejected => order.transition(OrderStatus::Rejected)?,
                _ => {}
            }
        }

        Ok(effect)
    }

    // --- discrepancies --------------------------------------------------

    pub fn record_discrepancy(&mut self, discrepancy: Discrepancy) {
        self.discrepancies.push(discrepancy);
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hktrade_core::types::{Side, TradeIntent};
    use rust_decimal_macros::dec;

    fn acknowledged_order(symbol: &str, side: Side, qty: Decimal) -> Order {
        let intent = TradeIntent::market(symbol, side, qty, dec!(370));
        let mut order = Order::new(
            Symbol::normalize(symbol).unwrap(),
            &intent,
            None,
            dec!(370),
            Some(dec!(390)),
        );
        order.transition(OrderStatus::Submitted).unwrap();
        order.assign_venue_id("V-1").unwrap();
        order.transition(OrderStatus::Acknowledged).unwrap();
        order
    }

    #[test]
    fn test_entry_fill_creates_position_with_stop() {
        let mut ledger = Ledger::new();
        let order = acknowledged_order("700", Side::Buy, dec!(100));
        let id = order.id;
        ledger.insert_order(order);

        let effect = ledger.apply_order_fill(id, dec!(100), dec!(378.10)).unwrap();
        assert_eq!(effect.order_status, OrderStatus::Filled);
        assert_eq!(effect.position_quantity, dec!(100));

        let symbol = Symbol::normalize("700").unwrap();
        let position = ledger.position(&symbol).unwrap();
        assert_eq!(position.stop_price, dec!(370));
        assert_eq!(position.order_ids, vec![id]);
    }

    #[test]
    fn test_exit_fill_removes_flat_position() {
        let mut ledger = Ledger::new();
        let symbol = Symbol::normalize("700").unwrap();

        let entry = acknowledged_order("700", Side::Buy, dec!(100));
        let entry_id = entry.id;
        ledger.insert_order(entry);
        ledger.apply_order_fill(entry_id, dec!(100), dec!(378.10)).unwrap();

        let exit = acknowledged_order("700", Side::Sell, dec!(100));
        let exit_id = exit.id;
        ledger.insert_order(exit);
        let effect = ledger.apply_order_fill(exit_id, dec!(100), dec!(390.00)).unwrap();

        assert!(effect.position_flat());
        assert_eq!(effect.realized_pnl, dec!(1190.00));
        assert!(ledger.position(&symbol).is_none());
    }

    #[test]
    fn test_absorb_submitted_order_found_filled() {
        let mut ledger = Ledger::new();
        let intent = TradeIntent::market("700", Side::Buy, dec!(100), dec!(370));
        let mut order = Order::new(
            Symbol::normalize("700").unwrap(),
            &intent,
            None,
            dec!(370),
            None,
        );
        order.transition(OrderStatus::Submitted).unwrap();
        let id = order.id;
        ledger.insert_order(order);

        let venue_order = VenueOrder {
            venue_order_id: "V-9".to_string(),
            symbol: Symbol::normalize("700").unwrap(),
            side: Side::Buy,
            quantity: dec!(100),
            filled_quantity: dec!(100),
            filled_avg_price: Some(dec!(377.80)),
            price: None,
            status: OrderStatus::Filled,
        };

        let effect = ledger.absorb_venue_order(id, &venue_order).unwrap().unwrap();
        assert_eq!(effect.order_status, OrderStatus::Filled);
        assert_eq!(ledger.order(id).unwrap().venue_order_id(), Some("V-9"));
        assert_eq!(ledger.order(id).unwrap().status, OrderStatus::Filled);
    }
}
