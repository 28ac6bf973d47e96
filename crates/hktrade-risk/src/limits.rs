//! Risk limit configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk limits applied by the safety gate. Percentages are fractions
/// (0.02 = 2%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum simultaneous open positions
    pub max_positions: usize,
    /// Maximum position value as a fraction of equity
    pub max_position_pct: Decimal,
    /// Minimum position value (venue currency)
    pub min_position_value: Decimal,
    /// Daily loss that blocks new entries
    pub max_daily_loss_pct: Decimal,
    /// Daily loss that starts emitting warnings
    pub warning_loss_pct: Decimal,
    /// Maximum loss a single trade may risk, as a fraction of equity
    pub max_trade_loss_pct: Decimal,
    /// Maximum entries per trading day
    pub max_daily_trades: u32,
    /// Minimum reward-to-risk ratio when a target is set
    pub min_risk_reward: Decimal,
    /// Maximum stop distance as a fraction of entry price
    pub max_stop_loss_pct: Decimal,
    /// Board lot size; quantities must be a multiple
    pub lot_size: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_positions: 5,
            max_position_pct: dec!(0.20),
            min_position_value: dec!(10000),
            max_daily_loss_pct: dec!(0.02),
            warning_loss_pct: dec!(0.015),
            max_trade_loss_pct: dec!(0.01),
            max_daily_trades: 10,
            min_risk_reward: dec!(2.0),
            max_stop_loss_pct: dec!(0.05),
            lot_size: dec!(100),
        }
    }
}
