//! Market quote and account summary types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// A market quote for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: u64,
    pub high: Decimal,
    pub low: Decimal,
    pub open: Decimal,
    pub prev_close: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Midpoint of bid/ask, falling back to last when one side is empty.
    pub fn mid(&self) -> Decimal {
        if self.bid > Decimal::ZERO && self.ask > Decimal::ZERO {
            (self.bid + self.ask) / Decimal::TWO
        } else {
            self.last
        }
    }
}

/// Account state as the venue reports it. Input to the safety gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Total account value
    pub equity: Decimal,
    /// Settled cash available
    pub cash: Decimal,
    pub buying_power: Decimal,
    /// Today's P&L as a fraction of equity (e.g. -0.01 for -1%)
    pub daily_pnl_pct: Decimal,
    pub currency: String,
    /// True when connected to the simulated environment
    pub paper: bool,
}
