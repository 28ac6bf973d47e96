//! Tick-size normalization.
//!
//! Exchanges price equities on a tiered tick grid: the minimum price
//! increment depends on the price itself. The table is data, not code,
//! so each venue can supply its own tiers without touching the rounding
//! logic.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::NormalizeError;

/// One price tier: prices strictly below `upper_bound` use `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTier {
    pub upper_bound: Decimal,
    pub tick: Decimal,
}

/// Ordered tick-size table. Prices at or above the last tier's bound use
/// the last tier's tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickTable {
    tiers: Vec<TickTier>,
}

impl TickTable {
    /// Build a table from `(upper_bound, tick)` pairs, ordered by bound.
    pub fn new(tiers: Vec<(Decimal, Decimal)>) -> Self {
        let tiers = tiers
            .into_iter()
            .map(|(upper_bound, tick)| TickTier { upper_bound, tick })
            .collect();
        Self { tiers }
    }

    /// The HKEX spread table (11 tiers).
    pub fn hkex() -> Self {
        use rust_decimal_macros::dec;
        Self::new(vec![
            (dec!(0.25), dec!(0.001)),
            (dec!(0.50), dec!(0.005)),
            (dec!(10.00), dec!(0.01)),
            (dec!(20.00), dec!(0.02)),
            (dec!(100.00), dec!(0.05)),
            (dec!(200.00), dec!(0.10)),
            (dec!(500.00), dec!(0.20)),
            (dec!(1000.00), dec!(0.50)),
            (dec!(2000.00), dec!(1.00)),
            (dec!(5000.00), dec!(2.00)),
            (Decimal::MAX, dec!(5.00)),
        ])
    }

    /// Look up the tick size applicable to a price.
    pub fn tick_for(&self, price: Decimal) -> Result<Decimal, NormalizeError> {
        if price <= Decimal::ZERO {
            return Err(NormalizeError::InvalidPrice(price));
        }
        let tier = self
            .tiers
            .iter()
            .find(|t| price < t.upper_bound)
            .or_else(|| self.tiers.last())
            .ok_or(NormalizeError::InvalidPrice(price))?;
        Ok(tier.tick)
    }

    /// Round a price to the nearest multiple of the applicable tick,
    /// half-up, with no more precision than the tick implies.
    ///
    /// Idempotent: `round(round(p)) == round(p)`.
    pub fn round_to_tick(&self, price: Decimal) -> Result<Decimal, NormalizeError> {
        let tick = self.tick_for(price)?;
        let steps = (price / tick)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Ok((steps * tick).round_dp(tick.scale()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn four_tier() -> TickTable {
        TickTable::new(vec![
            (dec!(10), dec!(0.01)),
            (dec!(20), dec!(0.02)),
            (dec!(100), dec!(0.05)),
            (dec!(1000), dec!(0.10)),
        ])
    }

    #[test]
    fn test_tier_lookup() {
        let table = four_tier();
        assert_eq!(table.tick_for(dec!(9.99)).unwrap(), dec!(0.01));
        assert_eq!(table.tick_for(dec!(10.00)).unwrap(), dec!(0.02));
        assert_eq!(table.tick_for(dec!(378.123)).unwrap(), dec!(0.10));
        // Above the last bound the final tier still applies.
        assert_eq!(table.tick_for(dec!(5000)).unwrap(), dec!(0.10));
    }

    #[test]
    fn test_round_half_up() {
        let table = four_tier();
        assert_eq!(table.round_to_tick(dec!(378.123)).unwrap(), dec!(378.10));
        assert_eq!(table.round_to_tick(dec!(378.15)).unwrap(), dec!(378.20));
        assert_eq!(table.round_to_tick(dec!(9.994)).unwrap(), dec!(9.99));
        assert_eq!(table.round_to_tick(dec!(9.995)).unwrap(), dec!(10.00));
    }

    #[test]
    fn test_round_is_idempotent() {
        let table = TickTable::hkex();
        for raw in [
            dec!(0.2489),
            dec!(0.313),
            dec!(8.472),
            dec!(19.99),
            dec!(55.123),
            dec!(378.123),
            dec!(1234.56),
            dec!(6001.7),
        ] {
            let once = table.round_to_tick(raw).unwrap();
            let twice = table.round_to_tick(once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_round_is_monotonic() {
        let table = TickTable::hkex();
        let mut prices: Vec<Decimal> = (1..2000)
            .map(|i| Decimal::from(i) * dec!(0.37))
            .collect();
        prices.sort();
        let rounded: Vec<Decimal> = prices
            .iter()
            .map(|p| table.round_to_tick(*p).unwrap())
            .collect();
        for pair in rounded.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let table = TickTable::hkex();
        assert!(table.round_to_tick(Decimal::ZERO).is_err());
        assert!(table.round_to_tick(dec!(-1.5)).is_err());
    }
}
