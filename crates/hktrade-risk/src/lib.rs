//! Risk policy enforcement.
//!
//! The safety gate is the last line of defense before any order reaches
//! a venue: every intent, entries and exits alike, passes through it.

mod limits;
mod calendar;
mod gate;

pub use limits::RiskLimits;
pub use calendar::{MarketSession, TradingCalendar};
pub use gate::{GateDecision, SafetyGate};
