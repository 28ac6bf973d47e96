//! The safety gate.
//!
//! Validates every proposed trade against risk policy before any venue
//! call is made. Pure validation: the gate performs no I/O and holds no
//! ledger state beyond its own daily counters.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use hktrade_core::types::{AccountSummary, Position, Side, TradeIntent};

use crate::{MarketSession, RiskLimits, TradingCalendar};

/// Decision from the safety gate.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Intent approved, possibly with advisory warnings
    Approved { warnings: Vec<String> },
    /// Intent rejected with the failing check's reason
    Rejected { reason: String },
}

impl GateDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateDecision::Approved { .. })
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            GateDecision::Rejected { reason } => Some(reason),
            GateDecision::Approved { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct DailyCounters {
    trade_date: Option<NaiveDate>,
    trades: u32,
}

impl DailyCounters {
    fn roll(&mut self, today: NaiveDate) {
        if self.trade_date != Some(today) {
            self.trade_date = Some(today);
            self.trades = 0;
        }
    }
}

/// Validates trading intents against risk limits and the session clock.
pub struct SafetyGate {
    limits: RiskLimits,
    calendar: TradingCalendar,
    counters: Mutex<DailyCounters>,
}

impl SafetyGate {
    pub fn new(limits: RiskLimits, calendar: TradingCalendar) -> Self {
        Self {
            limits,
            calendar,
            counters: Mutex::new(DailyCounters::default()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Checks that need no account state: session clock and board lot.
    /// Run before anything touches the venue, so a malformed intent
    /// causes no venue call at all.
    pub fn precheck(&self, intent: &TradeIntent, now: DateTime<Utc>) -> GateDecision {
        if let Some(reason) = self.static_violation(intent, now) {
            return self.reject(reason);
        }
        GateDecision::Approved { warnings: vec![] }
    }

    /// Validate an entry intent.
    ///
    /// `reference_price` is the expected entry price: the limit price for
    /// limit orders, the current quote for market orders.
    pub fn review(
        &self,
        intent: &TradeIntent,
        reference_price: Decimal,
        account: &AccountSummary,
        open_positions: usize,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let mut warnings = Vec::new();
        let limits = &self.limits;

        if let Some(reason) = self.static_violation(intent, now) {
            return self.reject(reason);
        }

        if reference_price <= Decimal::ZERO || account.equity <= Decimal::ZERO {
            return self.reject("Cannot price intent: no reference price or equity".to_string());
        }

        // Daily loss
        if account.daily_pnl_pct <= -limits.max_daily_loss_pct {
            return self.reject(format!(
                "Daily loss limit reached ({}% >= {}%)",
                account.daily_pnl_pct * dec!(100),
                limits.max_daily_loss_pct * dec!(100)
            ));
        }
        if account.daily_pnl_pct <= -limits.warning_loss_pct {
            warnings.push(format!(
                "Approaching daily loss limit ({}%)",
                account.daily_pnl_pct * dec!(100)
            ));
        }

        // Position count
        if open_positions >= limits.max_positions {
            return self.reject(format!(
                "Maximum positions reached ({}/{})",
                open_positions, limits.max_positions
            ));
        }

        // Position sizing
        let position_value = intent.quantity * reference_price;
        let portfolio_pct = position_value / account.equity;
        if portfolio_pct > limits.max_position_pct {
            return self.reject(format!(
                "Position too large ({}% > {}% of equity)",
                (portfolio_pct * dec!(100)).round_dp(1),
                limits.max_position_pct * dec!(100)
            ));
        }
        if position_value < limits.min_position_value {
            return self.reject(format!(
                "Position too small ({} < {})",
                position_value.round_dp(0),
                limits.min_position_value
            ));
        }
        if intent.side == Side::Buy && position_value > account.cash {
            return self.reject(format!(
                "Insufficient cash (need {}, have {})",
                position_value.round_dp(0),
                account.cash.round_dp(0)
            ));
        }

        // Stop placement
        let stop = intent.stop_price;
        match intent.side {
            Side::Buy if stop >= reference_price => {
                return self.reject(
                    "Stop must be below entry price for long positions".to_string(),
                );
            }
            Side::Sell if stop <= reference_price => {
                return self.reject(
                    "Stop must be above entry price for short positions".to_string(),
                );
            }
            _ => {}
        }

        let risk_per_share = (reference_price - stop).abs();
        let stop_pct = risk_per_share / reference_price;
        if stop_pct > limits.max_stop_loss_pct {
            return self.reject(format!(
                "Stop too wide ({}% > {}%)",
                (stop_pct * dec!(100)).round_dp(1),
                limits.max_stop_loss_pct * dec!(100)
            ));
        }

        // Per-trade risk
        let risk_amount = risk_per_share * intent.quantity;
        let risk_pct = risk_amount / account.equity;
        if risk_pct > limits.max_trade_loss_pct {
            return self.reject(format!(
                "Trade risk too high ({}% > {}% of equity)",
                (risk_pct * dec!(100)).round_dp(2),
                limits.max_trade_loss_pct * dec!(100)
            ));
        }

        // Target placement and reward/risk
        if let Some(target) = intent.target_price {
            match intent.side {
                Side::Buy if target <= reference_price => {
                    return self.reject(
                        "Target must be above entry price for long positions".to_string(),
                    );
                }
                Side::Sell if target >= reference_price => {
                    return self.reject(
                        "Target must be below entry price for short positions".to_string(),
                    );
                }
                _ => {}
            }

            if risk_per_share > Decimal::ZERO {
                let reward_per_share = (target - reference_price).abs();
                let risk_reward = reward_per_share / risk_per_share;
                if risk_reward < limits.min_risk_reward {
                    return self.reject(format!(
                        "Risk/reward too low ({}:1 < {}:1)",
                        risk_reward.round_dp(1),
                        limits.min_risk_reward
                    ));
                }
            }
        }

        // Daily trade count
        {
            let today = now.date_naive();
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            counters.roll(today);
            if counters.trades >= limits.max_daily_trades {
                return self.reject(format!(
                    "Daily trade limit reached ({}/{})",
                    counters.trades, limits.max_daily_trades
                ));
            }
        }

        debug!(symbol = %intent.symbol, side = %intent.side, "intent approved");
        GateDecision::Approved { warnings }
    }

    /// Validate a risk-reducing exit.
    ///
    /// Exits go through the gate like everything else, but the policy is
    /// permissive: the exit must exist against a real position and must
    /// reduce it, nothing more.
    pub fn review_exit(&self, intent: &TradeIntent, position: &Position) -> GateDecision {
        if position.is_flat() {
            return self.reject(format!("No open position for {}", intent.symbol));
        }
        if intent.side != position.exit_side() {
            return self.reject(format!(
                "Exit side {} does not reduce a {} position",
                intent.side,
                if position.is_long() { "long" } else { "short" }
            ));
        }
        if intent.quantity > position.abs_quantity() {
            return self.reject(format!(
                "Exit quantity {} exceeds position quantity {}",
                intent.quantity,
                position.abs_quantity()
            ));
        }
        GateDecision::Approved { warnings: vec![] }
    }

    /// Record an executed entry for daily-limit tracking.
    pub fn record_trade(&self, now: DateTime<Utc>) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.roll(now.date_naive());
        counters.trades += 1;
    }

    /// Whether the daily loss has breached the emergency-flatten level.
    pub fn should_flatten(&self, daily_pnl_pct: Decimal) -> bool {
        daily_pnl_pct <= -self.limits.max_daily_loss_pct
    }

    /// Current session for an instant; exposed for callers that report
    /// market state.
    pub fn session_at(&self, now: DateTime<Utc>) -> MarketSession {
        self.calendar.session_at(now)
    }

    fn static_violation(&self, intent: &TradeIntent, now: DateTime<Utc>) -> Option<String> {
        let session = self.calendar.session_at(now);
        if self.calendar.enforced() && !session.is_open() {
            return Some(session.closed_reason().to_string());
        }

        if intent.quantity <= Decimal::ZERO
            || intent.quantity % self.limits.lot_size != Decimal::ZERO
        {
            return Some(format!(
                "Quantity must be a positive multiple of {} (board lot)",
                self.limits.lot_size
            ));
        }
        None
    }

    fn reject(&self, reason: String) -> GateDecision {
        debug!(%reason, "intent rejected");
        GateDecision::Rejected { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hktrade_core::types::Symbol;

    fn gate() -> SafetyGate {
        SafetyGate::new(RiskLimits::default(), TradingCalendar::default())
    }

    fn account() -> AccountSummary {
        AccountSummary {
            equity: dec!(1000000),
            cash: dec!(600000),
            buying_power: dec!(600000),
            daily_pnl_pct: Decimal::ZERO,
            currency: "HKD".to_string(),
            paper: true,
        }
    }

    // A Wednesday morning on the HK clock (02:00 UTC = 10:00 HKT)
    fn trading_hours() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 2, 0, 0).unwrap()
    }

    fn intent() -> TradeIntent {
        TradeIntent::limit("700", Side::Buy, dec!(400), dec!(378.10), dec!(370.00))
            .with_target(dec!(395.00))
    }

    #[test]
    fn test_approves_clean_intent() {
        let decision = gate().review(&intent(), dec!(378.10), &account(), 0, trading_hours());
        assert!(decision.is_approved(), "{decision:?}");
    }

    #[test]
    fn test_rejects_off_lot_quantity() {
        let mut i = intent();
        i.quantity = dec!(150);
        let decision = gate().review(&i, dec!(378.10), &account(), 0, trading_hours());
        assert!(!decision.is_approved());
        assert!(decision.rejection_reason().unwrap().contains("board lot"));
    }

    #[test]
    fn test_rejects_when_market_closed() {
        // Saturday
        let weekend = Utc.with_ymd_and_hms(2026, 8, 8, 2, 0, 0).unwrap();
        let decision = gate().review(&intent(), dec!(378.10), &account(), 0, weekend);
        assert!(!decision.is_approved());
        assert!(decision.rejection_reason().unwrap().contains("weekend"));
    }

    #[test]
    fn test_rejects_stop_on_wrong_side() {
        let mut i = intent();
        i.stop_price = dec!(380.00); // above a long entry
        let decision = gate().review(&i, dec!(378.10), &account(), 0, trading_hours());
        assert!(!decision.is_approved());
        assert!(decision.rejection_reason().unwrap().contains("below entry"));
    }

    #[test]
    fn test_rejects_daily_loss_breach() {
        let mut acct = account();
        acct.daily_pnl_pct = dec!(-0.025);
        let decision = gate().review(&intent(), dec!(378.10), &acct, 0, trading_hours());
        assert!(!decision.is_approved());
        assert!(decision.rejection_reason().unwrap().contains("Daily loss"));
    }

    #[test]
    fn test_rejects_at_max_positions() {
        let decision = gate().review(&intent(), dec!(378.10), &account(), 5, trading_hours());
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_rejects_poor_risk_reward() {
        // 8.10 risk per share against a 1.90 reward
        let i = intent().with_target(dec!(380.00));
        let decision = gate().review(&i, dec!(378.10), &account(), 0, trading_hours());
        assert!(!decision.is_approved());
        assert!(decision.rejection_reason().unwrap().contains("Risk/reward"));
    }

    #[test]
    fn test_daily_trade_limit() {
        let g = gate();
        let now = trading_hours();
        for _ in 0..g.limits().max_daily_trades {
            g.record_trade(now);
        }
        let decision = g.review(&intent(), dec!(378.10), &account(), 0, now);
        assert!(!decision.is_approved());
        assert!(decision
            .rejection_reason()
            .unwrap()
            .contains("Daily trade limit"));
    }

    #[test]
    fn test_exit_review_is_permissive() {
        let g = gate();
        let position = Position::new(
            Symbol::normalize("700").unwrap(),
            dec!(400),
            dec!(378.10),
            dec!(370.00),
            None,
        );
        let exit = TradeIntent::market("700", Side::Sell, dec!(400), dec!(370.00));
        assert!(g.review_exit(&exit, &position).is_approved());

        // Wrong side does not reduce
        let wrong = TradeIntent::market("700", Side::Buy, dec!(400), dec!(370.00));
        assert!(!g.review_exit(&wrong, &position).is_approved());
    }
}
