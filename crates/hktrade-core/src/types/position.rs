//! Ledger position type.

use num_traits::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Side, Symbol};

/// A current holding. Every ledger position carries a protective stop;
/// a position without one is unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Number of shares (positive for long, negative for short)
    pub quantity: Decimal,
    /// Average entry price
    pub avg_cost: Decimal,
    /// Protective stop price
    pub stop_price: Decimal,
    /// Take-profit price
    pub target_price: Option<Decimal>,
    /// Orders that built or reduced this position
    pub order_ids: Vec<Uuid>,
}

impl Position {
    pub fn new(
        symbol: Symbol,
        quantity: Decimal,
        avg_cost: Decimal,
        stop_price: Decimal,
        target_price: Option<Decimal>,
    ) -> Self {
        Self {
            symbol,
            quantity,
            avg_cost,
            stop_price,
            target_price,
            order_ids: Vec::new(),
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    pub fn abs_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    /// The side of an order that would reduce this position.
    pub fn exit_side(&self) -> Side {
        if self.is_long() {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Apply a fill to the position. Returns the realized P&L when the
    /// fill reduces the holding.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
        let fill_qty = side.sign() * quantity;
        let mut realized = Decimal::ZERO;

        let same_direction = (self.quantity > Decimal::ZERO && fill_qty > Decimal::ZERO)
            || (self.quantity < Decimal::ZERO && fill_qty < Decimal::ZERO);

        if same_direction || self.quantity == Decimal::ZERO {
            // Adding to the position: blend the average entry price
            let total_cost = self.quantity * self.avg_cost + fill_qty * price;
            let new_quantity = self.quantity + fill_qty;
            if new_quantity != Decimal::ZERO {
                self.avg_cost = total_cost / new_quantity;
            }
            self.quantity = new_quantity;
        } else {
            // Reducing or reversing
            let close_qty = fill_qty.abs().min(self.quantity.abs());
            realized = if self.quantity > Decimal::ZERO {
                close_qty * (price - self.avg_cost)
            } else {
                close_qty * (self.avg_cost - price)
            };

            let remaining = fill_qty.abs() - close_qty;
            if remaining > Decimal::ZERO {
                // Reversal: the leftover opens a fresh position at the fill price
                self.quantity = fill_qty.signum() * remaining;
                self.avg_cost = price;
            } else {
                self.quantity += fill_qty;
            }
        }

        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position::new(
            Symbol::normalize("700").unwrap(),
            dec!(100),
            dec!(378.10),
            dec!(370.00),
            Some(dec!(390.00)),
        )
    }

    #[test]
    fn test_long_exit_side() {
        let p = long_position();
        assert!(p.is_long());
        assert_eq!(p.exit_side(), Side::Sell);
    }

    #[test]
    fn test_apply_fill_increase_blends_cost() {
        let mut p = long_position();
        let realized = p.apply_fill(Side::Buy, dec!(100), dec!(380.10));
        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(p.quantity, dec!(200));
        assert_eq!(p.avg_cost, dec!(379.10));
    }

    #[test]
    fn test_apply_fill_close_realizes_pnl() {
        let mut p = long_position();
        let realized = p.apply_fill(Side::Sell, dec!(100), dec!(390.00));
        assert_eq!(realized, dec!(1190.00));
        assert!(p.is_flat());
    }
}
