//! Trading-session calendar.
//!
//! HKEX trades in two sessions with a lunch break, on a fixed UTC+8
//! offset (no DST). Session times are configuration, not code.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Where the exchange clock currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    Weekend,
    PreMarket,
    Morning,
    Lunch,
    Afternoon,
    AfterHours,
}

impl MarketSession {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketSession::Morning | MarketSession::Afternoon)
    }

    /// Human-readable reason used in gate rejections.
    pub fn closed_reason(&self) -> &'static str {
        match self {
            MarketSession::Weekend => "Market closed: weekend",
            MarketSession::PreMarket => "Market closed: before market open",
            MarketSession::Lunch => "Market closed: lunch break",
            MarketSession::AfterHours => "Market closed: after market close",
            MarketSession::Morning | MarketSession::Afternoon => "Market open",
        }
    }
}

/// Exchange session times in local exchange time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingCalendar {
    pub morning_open: NaiveTime,
    pub morning_close: NaiveTime,
    pub afternoon_open: NaiveTime,
    pub afternoon_close: NaiveTime,
    /// Exchange UTC offset in hours (HKEX: +8, no DST)
    pub utc_offset_hours: i32,
    /// When false the clock is ignored (sim/paper environments)
    #[serde(default = "default_enforce")]
    pub enforce_sessions: bool,
}

fn default_enforce() -> bool {
    true
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self {
            morning_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            morning_close: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
            afternoon_open: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            afternoon_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            utc_offset_hours: 8,
            enforce_sessions: true,
        }
    }
}

impl TradingCalendar {
    /// A calendar that never blocks, for simulated venues.
    pub fn always_open() -> Self {
        Self {
            enforce_sessions: false,
            ..Self::default()
        }
    }
}

impl TradingCalendar {
    /// Whether session checks apply at all.
    pub fn enforced(&self) -> bool {
        self.enforce_sessions
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    /// Classify an instant against the exchange clock.
    pub fn session_at(&self, now: DateTime<Utc>) -> MarketSession {
        let local = now.with_timezone(&self.offset());

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketSession::Weekend;
        }

        let t = local.time();
        if t < self.morning_open {
            MarketSession::PreMarket
        } else if t < self.morning_close {
            MarketSession::Morning
        } else if t < self.afternoon_open {
            MarketSession::Lunch
        } else if t < self.afternoon_close {
            MarketSession::Afternoon
        } else {
            MarketSession::AfterHours
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.session_at(now).is_open()
    }
}
