//! Stop/target supervision for venues without native linked orders.
//!
//! The supervisor keeps a watch per position and turns price crossings
//! into exit intents. It never submits anything itself: emitted intents
//! flow back through the safety gate and the order lifecycle like any
//! other trade. A watch is retired only when the ledger confirms the
//! position is flat, not when the exit order is merely submitted.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use tracing::{debug, info};

use hktrade_core::types::{OrderStatus, Quote, Side, Symbol, TradeIntent};

use crate::ledger::FillEffect;

#[derive(Debug, Clone)]
struct Watch {
    /// Side of the held position's entry (Buy = long)
    entry_side: Side,
    quantity: Decimal,
    stop: Decimal,
    target: Option<Decimal>,
    /// One exit per watch; disarmed once an intent is emitted
    armed: bool,
}

/// Emulated protective exits, keyed by symbol.
#[derive(Debug, Default)]
pub struct StopTargetSupervisor {
    watches: Mutex<HashMap<Symbol, Watch>>,
}

impl StopTargetSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the watch for a symbol.
    pub fn register(
        &self,
        symbol: Symbol,
        entry_side: Side,
        quantity: Decimal,
        stop: Decimal,
        target: Option<Decimal>,
    ) {
        info!(%symbol, %stop, ?target, %quantity, "watch registered");
        self.lock().insert(
            symbol,
            Watch {
                entry_side,
                quantity,
                stop,
                target,
                armed: true,
            },
        );
    }

    /// Drop the watch for a symbol (position confirmed flat).
    pub fn retire(&self, symbol: &Symbol) {
        if self.lock().remove(symbol).is_some() {
            info!(%symbol, "watch retired");
        }
    }

    /// Re-arm after a failed exit so the next crossing fires again.
    pub fn rearm(&self, symbol: &Symbol) {
        if let Some(watch) = self.lock().get_mut(symbol) {
            watch.armed = true;
        }
    }

    pub fn is_watching(&self, symbol: &Symbol) -> bool {
        self.lock().contains_key(symbol)
    }

    pub fn watched_symbols(&self) -> Vec<Symbol> {
        self.lock().keys().cloned().collect()
    }

    /// Evaluate a price update. Returns at most one exit intent; the
    /// watch disarms so repeated updates past the threshold do not emit
    /// duplicates.
    pub fn on_quote(&self, quote: &Quote) -> Option<TradeIntent> {
        let mut watches = self.lock();
        let watch = watches.get_mut(&quote.symbol)?;
        if !watch.armed {
            return None;
        }

        let last = quote.last;
        let (crossed, trigger) = match watch.entry_side {
            // Long: stop below, target above
            Side::Buy => {
                if last <= watch.stop {
                    (true, "stop")
                } else if watch.target.map(|t| last >= t).unwrap_or(false) {
                    (true, "target")
                } else {
                    (false, "")
                }
            }
            // Short: stop above, target below
            Side::Sell => {
                if last >= watch.stop {
                    (true, "stop")
                } else if watch.target.map(|t| last <= t).unwrap_or(false) {
                    (true, "target")
                } else {
                    (false, "")
                }
            }
        };

        if !crossed {
            return None;
        }

        watch.armed = false;
        let exit_side = watch.entry_side.opposite();
        info!(
            symbol = %quote.symbol,
            %last,
            trigger,
            side = %exit_side,
            quantity = %watch.quantity,
            "exit threshold crossed"
        );

        let intent = TradeIntent::market(
            quote.symbol.as_str(),
            exit_side,
            watch.quantity,
            watch.stop,
        )
        .with_justification(format!(
            "{trigger} crossed at {last} (stop {}, target {:?})",
            watch.stop, watch.target
        ));
        debug!(symbol = %quote.symbol, "exit intent emitted");
        Some(intent)
    }

    /// Update supervision from a ledger fill effect: a flat position
    /// retires its watch; a completed entry on a venue without linked
    /// orders registers one.
    pub fn absorb_fill(&self, venue_has_linked_orders: bool, effect: &FillEffect) {
        if effect.position_flat() {
            self.retire(&effect.symbol);
            return;
        }
        if venue_has_linked_orders {
            return;
        }
        if effect.order_status == OrderStatus::Filled {
            let entry_side = if effect.position_quantity > Decimal::ZERO {
                Side::Buy
            } else {
                Side::Sell
            };
            self.register(
                effect.symbol.clone(),
                entry_side,
                effect.position_quantity.abs(),
                effect.stop_price,
                effect.target_price,
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Symbol, Watch>> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(symbol: &Symbol, last: Decimal) -> Quote {
        Quote {
            symbol: symbol.clone(),
            last,
            bid: last,
            ask: last,
            volume: 0,
            high: last,
            low: last,
            open: last,
            prev_close: last,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_long_stop_emits_single_exit() {
        let supervisor = StopTargetSupervisor::new();
        let symbol = Symbol::normalize("700").unwrap();
        supervisor.register(symbol.clone(), Side::Buy, dec!(100), dec!(9.00), None);

        let intent = supervisor.on_quote(&quote(&symbol, dec!(8.99))).unwrap();
        assert_eq!(intent.side, Side::Sell);
        assert_eq!(intent.quantity, dec!(100));

        // A second tick below the stop must not emit again
        assert!(supervisor.on_quote(&quote(&symbol, dec!(8.90))).is_none());
    }

    #[test]
    fn test_long_target_emits_sell() {
        let supervisor = StopTargetSupervisor::new();
        let symbol = Symbol::normalize("700").unwrap();
        supervisor.register(
            symbol.clone(),
            Side::Buy,
            dec!(100),
            dec!(9.00),
            Some(dec!(11.00)),
        );

        assert!(supervisor.on_quote(&quote(&symbol, dec!(10.50))).is_none());
        let intent = supervisor.on_quote(&quote(&symbol, dec!(11.02))).unwrap();
        assert_eq!(intent.side, Side::Sell);
    }

    #[test]
    fn test_short_stop_is_mirrored() {
        let supervisor = StopTargetSupervisor::new();
        let symbol = Symbol::normalize("388").unwrap();
        supervisor.register(
            symbol.clone(),
            Side::Sell,
            dec!(200),
            dec!(305.00),
            Some(dec!(280.00)),
        );

        assert!(supervisor.on_quote(&quote(&symbol, dec!(300.00))).is_none());
        let intent = supervisor.on_quote(&quote(&symbol, dec!(305.20))).unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.quantity, dec!(200));
    }

    #[test]
    fn test_rearm_after_failed_exit() {
        let supervisor = StopTargetSupervisor::new();
        let symbol = Symbol::normalize("700").unwrap();
        supervisor.register(symbol.clone(), Side::Buy, dec!(100), dec!(9.00), None);

        assert!(supervisor.on_quote(&quote(&symbol, dec!(8.99))).is_some());
        assert!(supervisor.on_quote(&quote(&symbol, dec!(8.99))).is_none());

        supervisor.rearm(&symbol);
        assert!(supervisor.on_quote(&quote(&symbol, dec!(8.99))).is_some());
    }

    #[test]
    fn test_retire_removes_watch() {
        let supervisor = StopTargetSupervisor::new();
        let symbol = Symbol::normalize("700").unwrap();
        supervisor.register(symbol.clone(), Side::Buy, dec!(100), dec!(9.00), None);
        supervisor.retire(&symbol);
        assert!(!supervisor.is_watching(&symbol));
        assert!(supervisor.on_quote(&quote(&symbol, dec!(1.00))).is_none());
    }
}
