//! Configuration structures.

use config::ConfigError;
use serde::{Deserialize, Serialize};

use hktrade_core::types::TickTable;
use hktrade_risk::{RiskLimits, TradingCalendar};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub venue: VenueSettings,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub market: TradingCalendar,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl AppConfig {
    /// Cross-field validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.app.environment.as_str() {
            "paper" | "live" => {}
            other => {
                return Err(ConfigError::Message(format!(
                    "environment must be 'paper' or 'live', got {other:?}"
                )));
            }
        }
        if self.engine.reconcile_interval_secs == 0 {
            return Err(ConfigError::Message(
                "engine.reconcile_interval_secs must be positive".to_string(),
            ));
        }
        if self.engine.keepalive_interval_secs == 0 {
            return Err(ConfigError::Message(
                "engine.keepalive_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn paper_trading(&self) -> bool {
        self.app.environment != "live"
    }
}

/// General app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    /// "paper" or "live"
    pub environment: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "hktrade".to_string(),
            environment: "paper".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

/// Which venue adapter to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    #[default]
    Futu,
    Ibkr,
    Sim,
}

/// Venue connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSettings {
    pub kind: VenueKind,
    #[serde(default)]
    pub futu: FutuSettings,
    #[serde(default)]
    pub ibkr: IbkrSettings,
    /// Override the venue's built-in tick tiers
    #[serde(default)]
    pub tick_table: Option<TickTable>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            kind: VenueKind::default(),
            futu: FutuSettings::default(),
            ibkr: IbkrSettings::default(),
            tick_table: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// OpenD gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutuSettings {
    pub host: String,
    pub port: u16,
    /// Environment variable holding the trade unlock password
    pub trade_password_env: String,
}

impl Default for FutuSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11111,
            trade_password_env: "FUTU_TRADE_PWD".to_string(),
        }
    }
}

/// Client Portal gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbkrSettings {
    pub gateway_url: String,
    pub account_id: Option<String>,
}

impl Default for IbkrSettings {
    fn default() -> Self {
        Self {
            gateway_url: "https://localhost:5000/v1/api".to_string(),
            account_id: None,
        }
    }
}

/// Background task tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Seconds between reconciliation passes
    pub reconcile_interval_secs: u64,
    /// Consecutive passes a discrepancy may persist before the fatal halt
    pub discrepancy_strike_threshold: u32,
    /// Orders younger than this are skipped by reconciliation
    pub min_order_age_secs: i64,
    /// Seconds between session keepalive pings
    pub keepalive_interval_secs: u64,
    /// Reconnect attempts before the session is marked dead
    pub max_keepalive_failures: u32,
    /// Initial reconnect backoff in milliseconds
    pub backoff_base_ms: u64,
    /// Reconnect backoff ceiling in milliseconds
    pub backoff_cap_ms: u64,
    /// Venue submit timeout in seconds
    pub submit_timeout_secs: u64,
    /// Seconds between quote polls for supervised positions
    pub quote_poll_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 60,
            discrepancy_strike_threshold: 2,
            min_order_age_secs: 30,
            keepalive_interval_secs: 240,
            max_keepalive_failures: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
            submit_timeout_secs: 10,
            quote_poll_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.paper_trading());
    }

    #[test]
    fn test_bad_environment_rejected() {
        let mut config = AppConfig::default();
        config.app.environment = "production".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.app.environment, "paper");
        assert_eq!(parsed.engine.reconcile_interval_secs, 60);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [app]
            name = "hktrade"
            environment = "live"

            [venue]
            kind = "ibkr"
            "#,
        )
        .unwrap();
        assert!(!parsed.paper_trading());
        assert_eq!(parsed.venue.kind, VenueKind::Ibkr);
        assert_eq!(parsed.risk.max_positions, 5);
    }
}
