//! The order lifecycle manager.
//!
//! One trade intent is processed start-to-finish under a per-symbol
//! lock: gate review, normalization, venue submission, acknowledgment.
//! A timeout or transient failure before acknowledgment leaves the order
//! `Submitted` for the reconciler to resolve; resubmitting blindly risks
//! duplicate execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use hktrade_core::error::{EngineError, GateError, TradeError, VenueError};
use hktrade_core::traits::{CancelOutcome, Venue};
use hktrade_core::types::{
    Bracket, Order, OrderKind, OrderStatus, Position, Symbol, TradeIntent, VenueOrderRequest,
};
use hktrade_core::TradeResult;
use hktrade_risk::{GateDecision, SafetyGate};

use crate::ledger::{FillEffect, Ledger};
use crate::supervisor::StopTargetSupervisor;

/// Order lifecycle manager.
pub struct ExecutionEngine {
    venue: Arc<dyn Venue>,
    gate: Arc<SafetyGate>,
    ledger: Arc<RwLock<Ledger>>,
    supervisor: Arc<StopTargetSupervisor>,
    symbol_locks: Mutex<HashMap<Symbol, Arc<tokio::sync::Mutex<()>>>>,
    halted: Arc<AtomicBool>,
    shutting_down: AtomicBool,
    submit_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        venue: Arc<dyn Venue>,
        gate: Arc<SafetyGate>,
        ledger: Arc<RwLock<Ledger>>,
        supervisor: Arc<StopTargetSupervisor>,
        halted: Arc<AtomicBool>,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            venue,
            gate,
            ledger,
            supervisor,
            symbol_locks: Mutex::new(HashMap::new()),
            halted,
            shutting_down: AtomicBool::new(false),
            submit_timeout,
        }
    }

    pub fn ledger(&self) -> Arc<RwLock<Ledger>> {
        Arc::clone(&self.ledger)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Operator acknowledgment of a fatal discrepancy; re-opens
    /// submission.
    pub fn acknowledge_halt(&self) {
        self.halted.store(false, Ordering::Release);
        info!("halt acknowledged; submissions re-enabled");
    }

    /// Submit a trade intent through the gate and on to the venue.
    ///
    /// Returns the tracked order. An order returned in `Submitted` state
    /// is pending/unconfirmed: the venue call timed out before an
    /// acknowledgment and the next reconciliation pass will settle it.
    pub async fn submit(&self, intent: TradeIntent) -> TradeResult<Order> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown.into());
        }
        if self.is_halted() {
            return Err(EngineError::Halted.into());
        }

        let symbol = Symbol::normalize(&intent.symbol)?;
        let lock = self.symbol_lock(&symbol);
        let _serialized = lock.lock().await;

        // Normalize every price onto the venue's tick grid before
        // anything is transmitted.
        let ticks = self.venue.tick_table();
        let limit_price = match (intent.kind, intent.limit_price) {
            (OrderKind::Limit, Some(p)) => Some(ticks.round_to_tick(p)?),
            (OrderKind::Limit, None) => {
                return Err(GateError::Rejected {
                    reason: "limit order without a limit price".to_string(),
                }
                .into());
            }
            (OrderKind::Market, _) => None,
        };
        let stop_price = ticks.round_to_tick(intent.stop_price)?;
        let target_price = intent
            .target_price
            .map(|t| ticks.round_to_tick(t))
            .transpose()?;

        // Exits are detected against the ledger, and reviewed under the
        // permissive exit policy.
        let held: Option<Position> = {
            let ledger = self.ledger.read().await;
            ledger.position(&symbol).cloned()
        };
        let is_exit = held
            .as_ref()
            .map(|p| intent.side == p.exit_side())
            .unwrap_or(false);

        let decision = match (&held, is_exit) {
            (Some(position), true) => self.gate.review_exit(&intent, position),
            _ => {
                // Session clock and lot checks first, before the account
                // and quote reads hit the venue.
                if let GateDecision::Rejected { reason } =
                    self.gate.precheck(&intent, Utc::now())
                {
                    return Err(GateError::Rejected { reason }.into());
                }
                let account = self.venue.get_account().await?;
                let reference_price = match limit_price {
                    Some(p) => p,
                    None => self.venue.get_quote(&symbol).await?.last,
                };
                let open_positions = self.ledger.read().await.open_position_count();
                self.gate
                    .review(&intent, reference_price, &account, open_positions, Utc::now())
            }
        };

        match decision {
            GateDecision::Rejected { reason } => {
                return Err(GateError::Rejected { reason }.into());
            }
            GateDecision::Approved { warnings } => {
                for warning in warnings {
                    warn!(symbol = %symbol, "{warning}");
                }
            }
        }

        // Track the order before it goes on the wire.
        let mut order = Order::new(symbol.clone(), &intent, limit_price, stop_price, target_price);
        order.transition(OrderStatus::Submitted)?;
        let order_id = order.id;
        {
            let mut ledger = self.ledger.write().await;
            ledger.insert_order(order.clone());
        }

        let request = VenueOrderRequest {
            symbol: symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            kind: intent.kind,
            limit_price,
            bracket: if !is_exit && self.venue.supports_linked_orders() {
                Some(Bracket {
                    stop: stop_price,
                    target: target_price,
                })
            } else {
                None
            },
            client_ref: order_id.to_string(),
            remark: intent.justification.clone(),
        };

        info!(
            %symbol,
            side = %intent.side,
            quantity = %intent.quantity,
            kind = %intent.kind,
            price = ?limit_price,
            "submitting order"
        );

        let placed =
            tokio::time::timeout(self.submit_timeout, self.venue.place_order(&request)).await;

        match placed {
            // Timed out before acknowledgment: the order may or may not
            // be live at the venue. Leave it Submitted for reconciliation.
            Err(_elapsed) => {
                warn!(%order_id, "submit timed out; order pending reconciliation");
                self.current_order(order_id).await
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!(%order_id, error = %e, "transient failure on submit; order pending reconciliation");
                self.current_order(order_id).await
            }
            // Synchronous decline is final: a policy or parameter
            // problem, never retried.
            Ok(Err(VenueError::Rejected { reason })) => {
                {
                    let mut ledger = self.ledger.write().await;
                    if let Some(order) = ledger.order_mut(order_id) {
                        order.transition(OrderStatus::Rejected)?;
                    }
                }
                warn!(%order_id, %reason, "order rejected by venue");
                Err(VenueError::Rejected { reason }.into())
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(ack)) => {
                {
                    let mut ledger = self.ledger.write().await;
                    let order = ledger
                        .order_mut(order_id)
                        .ok_or(EngineError::UnknownOrder(order_id))?;
                    order.assign_venue_id(ack.venue_order_id.clone())?;
                    order.transition(OrderStatus::Acknowledged)?;
                }
                if !is_exit {
                    self.gate.record_trade(Utc::now());
                }
                info!(%order_id, venue_order_id = %ack.venue_order_id, "order acknowledged");

                // Market orders often fill inside the submit window; one
                // best-effort poll keeps positions current without
                // waiting for the next sync pass.
                if let Err(e) = self.sync_order(order_id).await {
                    warn!(%order_id, error = %e, "post-ack poll failed");
                }
                self.current_order(order_id).await
            }
        }
    }

    /// Cancel an acknowledged order.
    ///
    /// Returns `false` when the venue reports the order already reached a
    /// terminal state (it raced a fill); the ledger is synced from the
    /// venue in that case.
    pub async fn cancel(&self, order_id: Uuid) -> TradeResult<bool> {
        let (status, venue_id) = {
            let ledger = self.ledger.read().await;
            let order = ledger
                .order(order_id)
                .ok_or(EngineError::UnknownOrder(order_id))?;
            (order.status, order.venue_order_id().map(String::from))
        };

        if !matches!(
            status,
            OrderStatus::Acknowledged | OrderStatus::PartiallyFilled
        ) {
            return Err(EngineError::NotCancelable { status }.into());
        }
        let venue_id = venue_id.ok_or(EngineError::NotCancelable { status })?;

        match self.venue.cancel_order(&venue_id).await? {
            CancelOutcome::Cancelled => {
                let mut ledger = self.ledger.write().await;
                if let Some(order) = ledger.order_mut(order_id) {
                    order.transition(OrderStatus::Cancelled)?;
                }
                info!(%order_id, "order cancelled");
                Ok(true)
            }
            CancelOutcome::AlreadyTerminal => {
                self.sync_order(order_id).await?;
                Ok(false)
            }
        }
    }

    /// Poll the venue for one order and absorb its state into the
    /// ledger, updating supervision on fills.
    pub async fn sync_order(&self, order_id: Uuid) -> TradeResult<Order> {
        let venue_id = {
            let ledger = self.ledger.read().await;
            let order = ledger
                .order(order_id)
                .ok_or(EngineError::UnknownOrder(order_id))?;
            match order.venue_order_id() {
                Some(id) => id.to_string(),
                None => return Ok(order.clone()),
            }
        };

        let venue_order = self.venue.get_order(&venue_id).await?;
        let effect = {
            let mut ledger = self.ledger.write().await;
            ledger.absorb_venue_order(order_id, &venue_order)?
        };
        if let Some(effect) = effect {
            self.apply_fill_effect(&effect);
        }
        self.current_order(order_id).await
    }

    /// Poll every active order with a venue id.
    pub async fn sync_open_orders(&self) -> TradeResult<()> {
        let ids: Vec<Uuid> = {
            let ledger = self.ledger.read().await;
            ledger
                .active_orders()
                .iter()
                .filter(|o| o.venue_order_id().is_some())
                .map(|o| o.id)
                .collect()
        };
        for id in ids {
            if let Err(e) = self.sync_order(id).await {
                warn!(order_id = %id, error = %e, "order sync failed");
            }
        }
        Ok(())
    }

    /// Market-exit an existing position through the normal gate path.
    pub async fn close_position(&self, symbol: &str, reason: &str) -> TradeResult<Order> {
        let canonical = Symbol::normalize(symbol)?;
        let position = {
            let ledger = self.ledger.read().await;
            ledger
                .position(&canonical)
                .cloned()
                .ok_or_else(|| EngineError::PositionNotFound(canonical.to_string()))?
        };

        let intent = TradeIntent::market(
            canonical.as_str(),
            position.exit_side(),
            position.abs_quantity(),
            position.stop_price,
        )
        .with_justification(reason.to_string());

        self.submit(intent).await
    }

    /// Emergency flatten: close every ledger position.
    pub async fn close_all_positions(&self, reason: &str) -> TradeResult<Vec<Order>> {
        warn!(reason, "closing all positions");
        let symbols: Vec<Symbol> = {
            let ledger = self.ledger.read().await;
            ledger.positions().map(|p| p.symbol.clone()).collect()
        };

        let mut orders = Vec::new();
        for symbol in symbols {
            match self.close_position(symbol.as_str(), reason).await {
                Ok(order) => orders.push(order),
                Err(e) => warn!(%symbol, error = %e, "close failed"),
            }
        }
        Ok(orders)
    }

    /// Stop accepting new intents. In-flight submissions continue to
    /// acknowledgment or timeout; await [`ExecutionEngine::drain`] for
    /// them.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        info!("engine shutting down; new intents refused");
    }

    /// Wait for in-flight submissions to settle.
    pub async fn drain(&self) {
        let locks: Vec<Arc<tokio::sync::Mutex<()>>> = {
            let map = self.symbol_locks.lock().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        for lock in locks {
            let _settled = lock.lock().await;
        }
    }

    /// Route a fill's consequences into the stop/target supervisor.
    pub(crate) fn apply_fill_effect(&self, effect: &FillEffect) {
        self.supervisor
            .absorb_fill(self.venue.supports_linked_orders(), effect);
    }

    async fn current_order(&self, order_id: Uuid) -> TradeResult<Order> {
        let ledger = self.ledger.read().await;
        ledger
            .order(order_id)
            .cloned()
            .ok_or_else(|| TradeError::from(EngineError::UnknownOrder(order_id)))
    }

    fn symbol_lock(&self, symbol: &Symbol) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.symbol_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(symbol.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StopTargetSupervisor;
    use hktrade_core::types::{Side, TickTable};
    use hktrade_risk::{RiskLimits, TradingCalendar};
    use hktrade_venue::SimVenue;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: ExecutionEngine,
        venue: Arc<SimVenue>,
        supervisor: Arc<StopTargetSupervisor>,
        halted: Arc<AtomicBool>,
    }

    fn four_tier() -> TickTable {
        TickTable::new(vec![
            (dec!(10), dec!(0.01)),
            (dec!(20), dec!(0.02)),
            (dec!(100), dec!(0.05)),
            (dec!(1000), dec!(0.10)),
        ])
    }

    fn fixture_with(venue: SimVenue) -> Fixture {
        let venue = Arc::new(venue);
        let gate = Arc::new(SafetyGate::new(
            RiskLimits::default(),
            TradingCalendar::always_open(),
        ));
        let ledger = Arc::new(RwLock::new(Ledger::new()));
        let supervisor = Arc::new(StopTargetSupervisor::new());
        let halted = Arc::new(AtomicBool::new(false));
        let engine = ExecutionEngine::new(
            venue.clone(),
            gate,
            ledger,
            Arc::clone(&supervisor),
            Arc::clone(&halted),
            Duration::from_secs(5),
        );
        Fixture {
            engine,
            venue,
            supervisor,
            halted,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SimVenue::new().with_tick_table(four_tier()))
    }

    fn intent() -> TradeIntent {
        TradeIntent::limit("700", Side::Buy, dec!(400), dec!(378.123), dec!(370.00))
            .with_target(dec!(395.00))
    }

    #[tokio::test]
    async fn test_submit_rounds_price_and_acknowledges() {
        let f = fixture();
        let order = f.engine.submit(intent()).await.unwrap();

        assert_eq!(order.status, OrderStatus::Acknowledged);
        // 378.123 lands in the "<1000" tier with a 0.10 tick
        assert_eq!(order.price, Some(dec!(378.10)));
        assert!(order.venue_order_id().is_some());
        assert_eq!(f.venue.place_call_count(), 1);
    }

    #[tokio::test]
    async fn test_off_lot_quantity_never_reaches_venue() {
        let f = fixture();
        let mut bad = intent();
        bad.quantity = dec!(250);

        let err = f.engine.submit(bad).await.unwrap_err();
        assert!(matches!(err, TradeError::Gate(GateError::Rejected { .. })));
        assert_eq!(f.venue.place_call_count(), 0);
        assert_eq!(f.engine.ledger().read().await.order_count(), 0);
    }

    #[tokio::test]
    async fn test_venue_rejection_is_terminal_and_not_retried() {
        let f = fixture();
        f.venue.reject_next_order("insufficient margin");

        let err = f.engine.submit(intent()).await.unwrap_err();
        assert!(matches!(err, TradeError::Venue(VenueError::Rejected { .. })));
        assert_eq!(f.venue.place_call_count(), 1);

        let ledger = f.engine.ledger();
        let ledger = ledger.read().await;
        let orders: Vec<_> = ledger.active_orders();
        assert!(orders.is_empty(), "rejected order must be terminal");
    }

    #[tokio::test]
    async fn test_timeout_leaves_order_submitted() {
        let f = fixture();
        f.venue.timeout_next_order();

        let order = f.engine.submit(intent()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(order.venue_order_id().is_none());
        assert_eq!(f.venue.place_call_count(), 1);
    }

    #[tokio::test]
    async fn test_fill_creates_position_and_watch() {
        let f = fixture();
        let order = f.engine.submit(intent()).await.unwrap();
        let venue_id = order.venue_order_id().unwrap().to_string();

        f.venue.fill_order(&venue_id, dec!(400), dec!(378.10));
        let order = f.engine.sync_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let symbol = Symbol::normalize("700").unwrap();
        {
            let ledger = f.engine.ledger();
            let ledger = ledger.read().await;
            let position = ledger.position(&symbol).unwrap();
            assert_eq!(position.quantity, dec!(400));
            assert_eq!(position.stop_price, dec!(370.00));
        }
        assert!(f.supervisor.is_watching(&symbol));
    }

    #[tokio::test]
    async fn test_linked_venue_gets_no_watch() {
        let f = fixture_with(
            SimVenue::with_capabilities(true, true).with_tick_table(four_tier()),
        );
        let order = f.engine.submit(intent()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        let symbol = Symbol::normalize("700").unwrap();
        assert!(f.engine.ledger().read().await.position(&symbol).is_some());
        assert!(!f.supervisor.is_watching(&symbol));
    }

    #[tokio::test]
    async fn test_cancel_open_order() {
        let f = fixture();
        let order = f.engine.submit(intent()).await.unwrap();

        let cancelled = f.engine.cancel(order.id).await.unwrap();
        assert!(cancelled);
        let ledger = f.engine.ledger();
        let ledger = ledger.read().await;
        assert_eq!(ledger.order(order.id).unwrap().status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_racing_a_fill_returns_false() {
        let f = fixture();
        let order = f.engine.submit(intent()).await.unwrap();
        let venue_id = order.venue_order_id().unwrap().to_string();
        f.venue.fill_order(&venue_id, dec!(400), dec!(378.10));

        let cancelled = f.engine.cancel(order.id).await.unwrap();
        assert!(!cancelled);
        let ledger = f.engine.ledger();
        let ledger = ledger.read().await;
        assert_eq!(ledger.order(order.id).unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_halt_blocks_submission() {
        let f = fixture();
        f.halted.store(true, Ordering::Release);

        let err = f.engine.submit(intent()).await.unwrap_err();
        assert!(matches!(err, TradeError::Engine(EngineError::Halted)));

        f.engine.acknowledge_halt();
        assert!(f.engine.submit(intent()).await.is_ok());
    }

    #[tokio::test]
    async fn test_dead_session_fails_fast() {
        let f = fixture();
        f.venue.set_authenticated(false);

        let err = f.engine.submit(intent()).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::Venue(VenueError::NotAuthenticated)
        ));
        assert_eq!(f.engine.ledger().read().await.order_count(), 0);
    }

    #[tokio::test]
    async fn test_supervised_exit_flattens_and_retires_watch() {
        let f = fixture();
        let symbol = Symbol::normalize("700").unwrap();

        let entry = f.engine.submit(intent()).await.unwrap();
        let venue_id = entry.venue_order_id().unwrap().to_string();
        f.venue.fill_order(&venue_id, dec!(400), dec!(378.10));
        f.engine.sync_order(entry.id).await.unwrap();
        assert!(f.supervisor.is_watching(&symbol));

        // Stop crossed: the supervisor emits the exit intent, which goes
        // back through the gate and lifecycle as a normal trade.
        let exit_intent =
            TradeIntent::market("700", Side::Sell, dec!(400), dec!(370.00))
                .with_justification("stop crossed");
        let exit = f.engine.submit(exit_intent).await.unwrap();
        let exit_venue_id = exit.venue_order_id().unwrap().to_string();

        // Watch survives until the ledger confirms the flat, not merely
        // on submission.
        assert!(f.supervisor.is_watching(&symbol));

        f.venue.fill_order(&exit_venue_id, dec!(400), dec!(369.80));
        f.engine.sync_order(exit.id).await.unwrap();

        assert!(f.engine.ledger().read().await.position(&symbol).is_none());
        assert!(!f.supervisor.is_watching(&symbol));
    }

    #[tokio::test]
    async fn test_close_position_routes_through_gate() {
        let f = fixture();
        let entry = f.engine.submit(intent()).await.unwrap();
        let venue_id = entry.venue_order_id().unwrap().to_string();
        f.venue.fill_order(&venue_id, dec!(400), dec!(378.10));
        f.engine.sync_order(entry.id).await.unwrap();

        let exit = f.engine.close_position("0700", "operator close").await.unwrap();
        assert_eq!(exit.side, Side::Sell);
        assert_eq!(exit.quantity, dec!(400));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_intents() {
        let f = fixture();
        f.engine.begin_shutdown();
        let err = f.engine.submit(intent()).await.unwrap_err();
        assert!(matches!(
            err,
            TradeError::Engine(EngineError::ShuttingDown)
        ));
        f.engine.drain().await;
    }
}
