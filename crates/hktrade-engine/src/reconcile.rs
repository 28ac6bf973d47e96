//! The reconciliation engine.
//!
//! On a fixed interval the ledger is diffed against a fresh venue
//! snapshot. The snapshot always wins for position existence and
//! quantity; the ledger is corrected in place and every divergence is
//! appended to the audit log. The same divergence surfacing on two
//! consecutive passes escalates to a fatal alert and halts new order
//! submission, since repeated drift points at a connectivity or logic
//! fault that auto-correction must not paper over.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use hktrade_core::error::VenueError;
use hktrade_core::traits::Venue;
use hktrade_core::types::{
    Discrepancy, DiscrepancyKind, OrderStatus, Position, Side, Symbol,
};
use hktrade_monitor::{AlertSeverity, AlertSink};

use crate::ledger::Ledger;
use crate::supervisor::StopTargetSupervisor;

/// Reconciliation tuning.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Consecutive passes the same discrepancy may surface before the
    /// fatal escalation
    pub strike_threshold: u32,
    /// Orders younger than this are skipped, to avoid racing an
    /// in-flight submission
    pub min_order_age_secs: i64,
    /// Emergency stop distance attached to positions adopted from the
    /// venue (fraction of average cost)
    pub adopted_stop_pct: Decimal,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            strike_threshold: 2,
            min_order_age_secs: 30,
            adopted_stop_pct: dec!(0.05),
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub discrepancies: Vec<Discrepancy>,
    pub corrected: usize,
}

/// Periodic ledger/venue diff.
pub struct Reconciler {
    venue: Arc<dyn Venue>,
    ledger: Arc<RwLock<Ledger>>,
    supervisor: Arc<StopTargetSupervisor>,
    alerts: Arc<dyn AlertSink>,
    halted: Arc<AtomicBool>,
    strikes: Mutex<HashMap<String, u32>>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        venue: Arc<dyn Venue>,
        ledger: Arc<RwLock<Ledger>>,
        supervisor: Arc<StopTargetSupervisor>,
        alerts: Arc<dyn AlertSink>,
        halted: Arc<AtomicBool>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            venue,
            ledger,
            supervisor,
            alerts,
            halted,
            strikes: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Run reconciliation on its own schedule until aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let reconciler = self;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(reconciler.config.interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match reconciler.run_once().await {
                    Ok(report) if !report.discrepancies.is_empty() => {
                        info!(
                            found = report.discrepancies.len(),
                            corrected = report.corrected,
                            "reconciliation corrected ledger"
                        );
                    }
                    Ok(_) => {}
                    // Snapshot reads are idempotent; the next tick is
                    // the retry.
                    Err(e) => warn!(error = %e, "reconciliation pass failed"),
                }
            }
        })
    }

    /// One reconciliation pass against a fresh snapshot.
    pub async fn run_once(&self) -> Result<ReconcileReport, VenueError> {
        let snapshot = self.venue.snapshot().await?;
        let mut found: Vec<Discrepancy> = Vec::new();
        let mut retire: Vec<Symbol> = Vec::new();
        let mut adopt_watch: Vec<Position> = Vec::new();
        let mut probe: Vec<(Uuid, String, Symbol)> = Vec::new();

        {
            let mut ledger = self.ledger.write().await;

            // Symbols with in-flight orders are settled through order
            // resolution below; diffing their positions in the same pass
            // would double-count the pending fill.
            let pending: HashSet<Symbol> = ledger
                .active_orders()
                .iter()
                .map(|o| o.symbol.clone())
                .collect();

            // Positions: ledger vs snapshot, snapshot wins.
            let held: Vec<(Symbol, Decimal)> = ledger
                .positions()
                .map(|p| (p.symbol.clone(), p.quantity))
                .collect();
            for (symbol, ledger_qty) in held {
                if pending.contains(&symbol) {
                    continue;
                }
                let venue_qty = snapshot.position_quantity(&symbol);
                if venue_qty == ledger_qty {
                    continue;
                }

                let (kind, resolution) = if venue_qty == Decimal::ZERO {
                    (
                        DiscrepancyKind::PhantomPosition,
                        "position removed from ledger",
                    )
                } else {
                    (
                        DiscrepancyKind::QuantityMismatch,
                        "ledger quantity set to venue quantity",
                    )
                };
                ledger.set_position_quantity(&symbol, venue_qty);
                if venue_qty == Decimal::ZERO {
                    retire.push(symbol.clone());
                }

                warn!(%symbol, %ledger_qty, %venue_qty, %kind, "position divergence");
                found.push(
                    Discrepancy::position(
                        kind,
                        symbol,
                        format!("ledger {ledger_qty}, venue {venue_qty}"),
                    )
                    .resolved(resolution),
                );
            }

            // Positions the venue holds that the ledger does not.
            for vp in &snapshot.positions {
                if vp.quantity == Decimal::ZERO
                    || pending.contains(&vp.symbol)
                    || ledger.position(&vp.symbol).is_some()
                {
                    continue;
                }
                let stop = if vp.quantity > Decimal::ZERO {
                    vp.avg_cost * (Decimal::ONE - self.config.adopted_stop_pct)
                } else {
                    vp.avg_cost * (Decimal::ONE + self.config.adopted_stop_pct)
                };
                let position =
                    Position::new(vp.symbol.clone(), vp.quantity, vp.avg_cost, stop, None);
                ledger.insert_position(position.clone());
                adopt_watch.push(position);

                warn!(symbol = %vp.symbol, quantity = %vp.quantity, "adopting venue position");
                found.push(
                    Discrepancy::position(
                        DiscrepancyKind::MissingPosition,
                        vp.symbol.clone(),
                        format!("venue holds {} not in ledger", vp.quantity),
                    )
                    .resolved("position adopted with emergency stop"),
                );
            }

            // Orders the ledger believes are open.
            let now = Utc::now();
            let candidates: Vec<(Uuid, Option<String>, Symbol)> = ledger
                .active_orders()
                .iter()
                .filter(|o| {
                    (now - o.updated_at).num_seconds() >= self.config.min_order_age_secs
                })
                .map(|o| {
                    (
                        o.id,
                        o.venue_order_id().map(String::from),
                        o.symbol.clone(),
                    )
                })
                .collect();

            for (order_id, venue_id, symbol) in candidates {
                match venue_id {
                    Some(venue_id) => {
                        if snapshot.find_open_order(&venue_id).is_none() {
                            probe.push((order_id, venue_id, symbol));
                        }
                    }
                    // Never acknowledged and not visible at the venue:
                    // assume the submission was lost.
                    None => {
                        if let Some(order) = ledger.order_mut(order_id) {
                            if let Err(e) =
                                order.transition(OrderStatus::Expired)
                            {
                                warn!(%order_id, error = %e, "could not expire order");
                                continue;
                            }
                        }
                        found.push(
                            Discrepancy::order(
                                order_id,
                                symbol,
                                "submitted order never acknowledged and not reported by venue",
                            )
                            .resolved("marked expired"),
                        );
                    }
                }
            }
        }

        // Resolve orders the venue no longer reports open, without
        // holding the ledger lock across venue calls.
        for (order_id, venue_id, symbol) in probe {
            match self.venue.get_order(&venue_id).await {
                Ok(venue_order) => {
                    let resolution = if venue_order.status
                        == OrderStatus::Filled
                        || venue_order.filled_quantity > Decimal::ZERO
                    {
                        "ledger updated from venue fill"
                    } else {
                        "marked terminal from venue state"
                    };

                    let effect = {
                        let mut ledger = self.ledger.write().await;
                        ledger.absorb_venue_order(order_id, &venue_order)
                    };
                    match effect {
                        Ok(Some(effect)) => self
                            .supervisor
                            .absorb_fill(self.venue.supports_linked_orders(), &effect),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(%order_id, error = %e, "could not absorb venue order");
                            continue;
                        }
                    }

                    found.push(
                        Discrepancy::order(
                            order_id,
                            symbol,
                            format!("open in ledger, venue reports {}", venue_order.status),
                        )
                        .resolved(resolution),
                    );
                }
                Err(VenueError::OrderNotFound(_)) => {
                    let mut ledger = self.ledger.write().await;
                    if let Some(order) = ledger.order_mut(order_id) {
                        if order.status.is_active() {
                            if let Err(e) =
                                order.transition(OrderStatus::Expired)
                            {
                                warn!(%order_id, error = %e, "could not expire order");
                                continue;
                            }
                        }
                    }
                    found.push(
                        Discrepancy::order(order_id, symbol, "order unknown to venue")
                            .resolved("marked expired"),
                    );
                }
                Err(e) => warn!(%order_id, error = %e, "order probe failed"),
            }
        }

        for symbol in &retire {
            self.supervisor.retire(symbol);
        }
        if !self.venue.supports_linked_orders() {
            for position in &adopt_watch {
                let entry_side = if position.is_long() {
                    Side::Buy
                } else {
                    Side::Sell
                };
                self.supervisor.register(
                    position.symbol.clone(),
                    entry_side,
                    position.abs_quantity(),
                    position.stop_price,
                    position.target_price,
                );
            }
        }

        // Audit log and escalation accounting.
        let corrected = found.iter().filter(|d| d.resolution.is_some()).count();
        {
            let mut ledger = self.ledger.write().await;
            for discrepancy in &found {
                ledger.record_discrepancy(discrepancy.clone());
            }
        }
        self.count_strikes(&found);

        Ok(ReconcileReport {
            discrepancies: found,
            corrected,
        })
    }

    /// Track consecutive hits per divergence key; the second consecutive
    /// pass with the same key raises the fatal alert and halts
    /// submission.
    fn count_strikes(&self, found: &[Discrepancy]) {
        let mut strikes = self.strikes.lock().unwrap_or_else(|e| e.into_inner());
        let keys: HashSet<String> = found.iter().map(|d| d.strike_key()).collect();

        strikes.retain(|key, _| keys.contains(key));
        for key in keys {
            let count = strikes.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count >= self.config.strike_threshold {
                self.halted.store(true, Ordering::Release);
                self.alerts.alert(
                    AlertSeverity::Fatal,
                    &format!(
                        "discrepancy {key} persisted across {count} reconciliation passes; \
                         trading halted pending operator acknowledgment"
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hktrade_core::types::{Order, TradeIntent};
    use hktrade_venue::SimVenue;
    use std::sync::atomic::AtomicU32;

    struct RecordingAlerts {
        fatal: AtomicU32,
    }

    impl RecordingAlerts {
        fn new() -> Self {
            Self {
                fatal: AtomicU32::new(0),
            }
        }

        fn fatal_count(&self) -> u32 {
            self.fatal.load(Ordering::SeqCst)
        }
    }

    impl AlertSink for RecordingAlerts {
        fn alert(&self, severity: AlertSeverity, _message: &str) {
            if severity == AlertSeverity::Fatal {
                self.fatal.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct Fixture {
        reconciler: Reconciler,
        venue: Arc<SimVenue>,
        ledger: Arc<RwLock<Ledger>>,
        supervisor: Arc<StopTargetSupervisor>,
        alerts: Arc<RecordingAlerts>,
        halted: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let venue = Arc::new(SimVenue::new());
        let ledger = Arc::new(RwLock::new(Ledger::new()));
        let supervisor = Arc::new(StopTargetSupervisor::new());
        let alerts = Arc::new(RecordingAlerts::new());
        let halted = Arc::new(AtomicBool::new(false));
        let config = ReconcileConfig {
            min_order_age_secs: 0,
            ..Default::default()
        };
        let reconciler = Reconciler::new(
            venue.clone(),
            Arc::clone(&ledger),
            Arc::clone(&supervisor),
            alerts.clone(),
            Arc::clone(&halted),
            config,
        );
        Fixture {
            reconciler,
            venue,
            ledger,
            supervisor,
            alerts,
            halted,
        }
    }

    fn symbol() -> Symbol {
        Symbol::normalize("700").unwrap()
    }

    fn ledger_position(quantity: Decimal) -> Position {
        Position::new(symbol(), quantity, dec!(378.10), dec!(370.00), None)
    }

    fn acknowledged_order(venue_id: &str, side: Side, quantity: Decimal) -> Order {
        let intent = TradeIntent::market("700", side, quantity, dec!(370.00));
        let mut order = Order::new(symbol(), &intent, None, dec!(370.00), None);
        order.transition(OrderStatus::Submitted).unwrap();
        order.assign_venue_id(venue_id).unwrap();
        order.transition(OrderStatus::Acknowledged).unwrap();
        order
    }

    #[tokio::test]
    async fn test_phantom_position_corrected_with_one_discrepancy() {
        let f = fixture();
        f.ledger.write().await.insert_position(ledger_position(dec!(400)));
        f.supervisor
            .register(symbol(), Side::Buy, dec!(400), dec!(370.00), None);

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(
            report.discrepancies[0].kind,
            DiscrepancyKind::PhantomPosition
        );
        assert!(f.ledger.read().await.position(&symbol()).is_none());
        assert_eq!(f.ledger.read().await.discrepancies().len(), 1);
        assert!(!f.supervisor.is_watching(&symbol()));
        assert!(!f.halted.load(Ordering::Acquire));
        assert_eq!(f.alerts.fatal_count(), 0);
    }

    #[tokio::test]
    async fn test_persistent_divergence_escalates_to_fatal_halt() {
        let f = fixture();
        f.ledger.write().await.insert_position(ledger_position(dec!(400)));
        f.reconciler.run_once().await.unwrap();
        assert!(!f.halted.load(Ordering::Acquire));

        // The same divergence reappearing on the very next pass means
        // something deeper than a missed fill is wrong.
        f.ledger.write().await.insert_position(ledger_position(dec!(400)));
        f.reconciler.run_once().await.unwrap();

        assert!(f.halted.load(Ordering::Acquire));
        assert_eq!(f.alerts.fatal_count(), 1);
    }

    #[tokio::test]
    async fn test_strike_count_resets_after_clean_pass() {
        let f = fixture();
        f.ledger.write().await.insert_position(ledger_position(dec!(400)));
        f.reconciler.run_once().await.unwrap();

        // Clean pass clears the strike
        f.reconciler.run_once().await.unwrap();

        f.ledger.write().await.insert_position(ledger_position(dec!(400)));
        f.reconciler.run_once().await.unwrap();

        assert!(!f.halted.load(Ordering::Acquire));
        assert_eq!(f.alerts.fatal_count(), 0);
    }

    #[tokio::test]
    async fn test_quantity_mismatch_takes_venue_quantity() {
        let f = fixture();
        f.venue.seed_position(&symbol(), dec!(200), dec!(378.10));
        f.ledger.write().await.insert_position(ledger_position(dec!(400)));

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(
            report.discrepancies[0].kind,
            DiscrepancyKind::QuantityMismatch
        );
        let ledger = f.ledger.read().await;
        let position = ledger.position(&symbol()).unwrap();
        assert_eq!(position.quantity, dec!(200));
        // Correction keeps the protective stop
        assert_eq!(position.stop_price, dec!(370.00));
    }

    #[tokio::test]
    async fn test_venue_only_position_adopted_with_emergency_stop() {
        let f = fixture();
        f.venue.seed_position(&symbol(), dec!(500), dec!(80.00));

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(
            report.discrepancies[0].kind,
            DiscrepancyKind::MissingPosition
        );
        let ledger = f.ledger.read().await;
        let position = ledger.position(&symbol()).unwrap();
        assert_eq!(position.quantity, dec!(500));
        assert_eq!(position.stop_price, dec!(76.00)); // 5% under cost
        drop(ledger);
        assert!(f.supervisor.is_watching(&symbol()));
    }

    #[tokio::test]
    async fn test_lost_submission_marked_expired() {
        let f = fixture();
        let intent = TradeIntent::market("700", Side::Buy, dec!(100), dec!(370.00));
        let mut order = Order::new(symbol(), &intent, None, dec!(370.00), None);
        order.transition(OrderStatus::Submitted).unwrap();
        let id = order.id;
        f.ledger.write().await.insert_order(order);

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::StaleOrder);
        assert_eq!(
            f.ledger.read().await.order(id).unwrap().status,
            OrderStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_stale_order_resolved_as_filled() {
        let f = fixture();

        // The venue knows the order and has filled it; the ledger is
        // behind because the status poll was missed.
        let request = hktrade_core::types::VenueOrderRequest {
            symbol: symbol(),
            side: Side::Buy,
            quantity: dec!(100),
            kind: hktrade_core::types::OrderKind::Market,
            limit_price: None,
            bracket: None,
            client_ref: "ref-1".to_string(),
            remark: String::new(),
        };
        let ack = f.venue.place_order(&request).await.unwrap();
        f.venue.fill_order(&ack.venue_order_id, dec!(100), dec!(378.00));

        let order = acknowledged_order(&ack.venue_order_id, Side::Buy, dec!(100));
        let id = order.id;
        f.ledger.write().await.insert_order(order);

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        let ledger = f.ledger.read().await;
        assert_eq!(ledger.order(id).unwrap().status, OrderStatus::Filled);
        let position = ledger.position(&symbol()).unwrap();
        assert_eq!(position.quantity, dec!(100));
        drop(ledger);
        assert!(f.supervisor.is_watching(&symbol()));
    }

    #[tokio::test]
    async fn test_stale_order_unknown_to_venue_expires() {
        let f = fixture();
        let order = acknowledged_order("GHOST-1", Side::Buy, dec!(100));
        let id = order.id;
        f.ledger.write().await.insert_order(order);

        let report = f.reconciler.run_once().await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(
            f.ledger.read().await.order(id).unwrap().status,
            OrderStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_clean_ledger_reports_nothing() {
        let f = fixture();
        let report = f.reconciler.run_once().await.unwrap();
        assert!(report.discrepancies.is_empty());
        assert_eq!(report.corrected, 0);
    }
}
