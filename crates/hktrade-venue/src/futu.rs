//! Futu/Moomoo venue adapter for HKEX trading.
//!
//! Talks to an OpenD gateway bridge over HTTP. OpenD has no native
//! bracket orders: every submission is a single leg, and protective
//! exits are emulated upstream by the stop/target supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hktrade_core::error::VenueError;
use hktrade_core::traits::{CancelOutcome, Venue, VenueAck};
use hktrade_core::types::{
    AccountSummary, OrderStatus, Quote, Side, Symbol, SymbolCodec, TickTable, VenueOrder,
    VenueOrderRequest, VenuePosition,
};

use crate::session::{Session, SessionTransport};

/// OpenD remarks are capped at 64 characters.
const REMARK_LIMIT: usize = 64;

/// OpenD gateway configuration.
#[derive(Debug, Clone)]
pub struct FutuConfig {
    pub host: String,
    pub port: u16,
    pub paper: bool,
    pub request_timeout_secs: u64,
}

impl FutuConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, VenueError> {
        let host = std::env::var("FUTU_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("FUTU_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(11111);
        let paper = std::env::var("FUTU_PAPER")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self {
            host,
            port,
            paper,
            request_timeout_secs: 10,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn trd_env(&self) -> &'static str {
        if self.paper {
            "SIMULATE"
        } else {
            "REAL"
        }
    }
}

/// OpenD response envelope.
#[derive(Debug, Deserialize)]
struct OpendResponse<T> {
    ret_code: i32,
    #[serde(default)]
    ret_msg: Option<String>,
    data: Option<T>,
}

impl<T> OpendResponse<T> {
    fn into_data(self) -> Result<T, VenueError> {
        if self.ret_code != 0 {
            return Err(VenueError::Api(
                self.ret_msg.unwrap_or_else(|| "unknown OpenD error".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| VenueError::Api("empty OpenD response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct PlaceOrderBody<'a> {
    code: String,
    price: Decimal,
    qty: Decimal,
    trd_side: &'a str,
    order_type: &'a str,
    trd_env: &'a str,
    remark: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderData {
    order_id: String,
}

#[derive(Debug, Serialize)]
struct ModifyOrderBody<'a> {
    order_id: &'a str,
    op: &'a str,
    trd_env: &'a str,
}

#[derive(Debug, Deserialize)]
struct FutuOrder {
    order_id: String,
    code: String,
    trd_side: String,
    qty: Decimal,
    #[serde(default)]
    dealt_qty: Decimal,
    #[serde(default)]
    dealt_avg_price: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    order_status: String,
}

#[derive(Debug, Deserialize)]
struct FutuPosition {
    code: String,
    qty: Decimal,
    cost_price: Decimal,
    #[serde(default)]
    market_val: Decimal,
    #[serde(default)]
    pl_val: Decimal,
}

#[derive(Debug, Deserialize)]
struct FutuAccInfo {
    total_assets: Decimal,
    cash: Decimal,
    power: Decimal,
    #[serde(default)]
    today_pl_ratio: Decimal,
}

#[derive(Debug, Deserialize)]
struct FutuSnapshot {
    last_price: Decimal,
    bid_price: Decimal,
    ask_price: Decimal,
    #[serde(default)]
    volume: u64,
    high_price: Decimal,
    low_price: Decimal,
    open_price: Decimal,
    prev_close_price: Decimal,
}

fn truncate_remark(remark: &str) -> &str {
    match remark.char_indices().nth(REMARK_LIMIT) {
        Some((idx, _)) => &remark[..idx],
        None => remark,
    }
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "WAITING_SUBMIT" | "SUBMITTING" | "SUBMITTED" => OrderStatus::Acknowledged,
        "FILLED_PART" => OrderStatus::PartiallyFilled,
        "FILLED_ALL" => OrderStatus::Filled,
        "CANCELLING_PART" | "CANCELLING_ALL" => OrderStatus::Acknowledged,
        "CANCELLED_PART" | "CANCELLED_ALL" => OrderStatus::Cancelled,
        "FAILED" | "DISABLED" | "DELETED" => OrderStatus::Rejected,
        "TIMEOUT" => OrderStatus::Expired,
        other => {
            warn!(status = other, "unknown OpenD order status");
            OrderStatus::Acknowledged
        }
    }
}

fn map_transport_err(e: reqwest::Error) -> VenueError {
    if e.is_timeout() {
        VenueError::Timeout
    } else {
        VenueError::Connectivity(e.to_string())
    }
}

/// HKEX venue via the Futu OpenD gateway.
pub struct FutuVenue {
    config: FutuConfig,
    client: Client,
    session: Arc<Session>,
    codec: SymbolCodec,
    ticks: TickTable,
}

impl FutuVenue {
    pub fn new(config: FutuConfig, session: Arc<Session>) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VenueError::Connectivity(e.to_string()))?;

        Ok(Self {
            config,
            client,
            session,
            codec: SymbolCodec::new("HK.", 5),
            ticks: TickTable::hkex(),
        })
    }

    /// Override the tick tiers (defaults to the HKEX table).
    pub fn with_tick_table(mut self, ticks: TickTable) -> Self {
        self.ticks = ticks;
        self
    }

    fn parse_order(&self, o: FutuOrder) -> Result<VenueOrder, VenueError> {
        let symbol = self.codec.parse(&o.code)?;
        let side = match o.trd_side.as_str() {
            "BUY" => Side::Buy,
            "SELL" => Side::Sell,
            other => return Err(VenueError::Api(format!("unknown side: {other}"))),
        };
        Ok(VenueOrder {
            venue_order_id: o.order_id,
            symbol,
            side,
            quantity: o.qty,
            filled_quantity: o.dealt_qty,
            filled_avg_price: o.dealt_avg_price,
            price: o.price,
            status: map_status(&o.order_status),
        })
    }

    fn parse_position(&self, p: FutuPosition) -> Result<Option<VenuePosition>, VenueError> {
        if p.qty == Decimal::ZERO {
            return Ok(None);
        }
        let symbol = self.codec.parse(&p.code)?;
        let current_price = if p.qty != Decimal::ZERO {
            p.market_val / p.qty
        } else {
            Decimal::ZERO
        };
        Ok(Some(VenuePosition {
            symbol,
            quantity: p.qty,
            avg_cost: p.cost_price,
            current_price,
            unrealized_pnl: p.pl_val,
        }))
    }

    async fn fetch_orders(&self) -> Result<Vec<VenueOrder>, VenueError> {
        let url = format!("{}/trade/order-list", self.config.base_url());
        let resp = self
            .client
            .get(&url)
            .query(&[("trd_env", self.config.trd_env())])
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: OpendResponse<Vec<FutuOrder>> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        body.into_data()?
            .into_iter()
            .map(|o| self.parse_order(o))
            .collect()
    }
}

#[async_trait]
impl Venue for FutuVenue {
    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueAck, VenueError> {
        self.session.require_live()?;

        if request.bracket.is_some() {
            warn!(
                symbol = %request.symbol,
                "OpenD has no native linked orders; bracket ignored, exits are supervised"
            );
        }

        let (order_type, price) = match request.kind {
            hktrade_core::types::OrderKind::Market => ("MARKET", Decimal::ZERO),
            hktrade_core::types::OrderKind::Limit => (
                "NORMAL",
                request
                    .limit_price
                    .ok_or_else(|| VenueError::Api("limit order without price".to_string()))?,
            ),
        };

        let body = PlaceOrderBody {
            code: self.codec.to_venue(&request.symbol),
            price,
            qty: request.quantity,
            trd_side: match request.side {
                Side::Buy => "BUY",
                Side::Sell => "SELL",
            },
            order_type,
            trd_env: self.config.trd_env(),
            remark: truncate_remark(&request.remark),
        };

        debug!(code = %body.code, side = body.trd_side, qty = %body.qty, "placing OpenD order");

        let url = format!("{}/trade/place-order", self.config.base_url());
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_err)?;

        let envelope: OpendResponse<PlaceOrderData> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        if envelope.ret_code != 0 {
            return Err(VenueError::Rejected {
                reason: envelope
                    .ret_msg
                    .unwrap_or_else(|| "order declined".to_string()),
            });
        }
        let data = envelope
            .data
            .ok_or_else(|| VenueError::Api("empty place-order response".to_string()))?;

        info!(order_id = %data.order_id, "OpenD order submitted");
        Ok(VenueAck::new(data.order_id))
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelOutcome, VenueError> {
        self.session.require_live()?;

        let body = ModifyOrderBody {
            order_id: venue_order_id,
            op: "CANCEL",
            trd_env: self.config.trd_env(),
        };

        let url = format!("{}/trade/modify-order", self.config.base_url());
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_err)?;

        let envelope: OpendResponse<serde_json::Value> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        if envelope.ret_code == 0 {
            info!(order_id = venue_order_id, "OpenD order cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        // A declined cancel usually means the order raced into a terminal
        // state; confirm against the venue before reporting failure.
        let order = self.get_order(venue_order_id).await?;
        if order.status.is_terminal() {
            Ok(CancelOutcome::AlreadyTerminal)
        } else {
            Err(VenueError::Api(
                envelope
                    .ret_msg
                    .unwrap_or_else(|| "cancel declined".to_string()),
            ))
        }
    }

    async fn get_order(&self, venue_order_id: &str) -> Result<VenueOrder, VenueError> {
        self.session.require_live()?;
        self.fetch_orders()
            .await?
            .into_iter()
            .find(|o| o.venue_order_id == venue_order_id)
            .ok_or_else(|| VenueError::OrderNotFound(venue_order_id.to_string()))
    }

    async fn get_open_orders(&self) -> Result<Vec<VenueOrder>, VenueError> {
        self.session.require_live()?;
        Ok(self
            .fetch_orders()
            .await?
            .into_iter()
            .filter(|o| o.status.is_active())
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        self.session.require_live()?;

        let url = format!("{}/trade/position-list", self.config.base_url());
        let resp = self
            .client
            .get(&url)
            .query(&[("trd_env", self.config.trd_env())])
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: OpendResponse<Vec<FutuPosition>> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        let mut positions = Vec::new();
        for p in body.into_data()? {
            if let Some(pos) = self.parse_position(p)? {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    async fn get_account(&self) -> Result<AccountSummary, VenueError> {
        self.session.require_live()?;

        let url = format!("{}/trade/accinfo", self.config.base_url());
        let resp = self
            .client
            .get(&url)
            .query(&[("trd_env", self.config.trd_env())])
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: OpendResponse<FutuAccInfo> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        let info = body.into_data()?;

        Ok(AccountSummary {
            equity: info.total_assets,
            cash: info.cash,
            buying_power: info.power,
            daily_pnl_pct: info.today_pl_ratio,
            currency: "HKD".to_string(),
            paper: self.config.paper,
        })
    }

    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, VenueError> {
        self.session.require_live()?;

        let url = format!("{}/quote/market-snapshot", self.config.base_url());
        let resp = self
            .client
            .get(&url)
            .query(&[("code", self.codec.to_venue(symbol))])
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: OpendResponse<FutuSnapshot> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        let snap = body.into_data()?;

        Ok(Quote {
            symbol: symbol.clone(),
            last: snap.last_price,
            bid: snap.bid_price,
            ask: snap.ask_price,
            volume: snap.volume,
            high: snap.high_price,
            low: snap.low_price,
            open: snap.open_price,
            prev_close: snap.prev_close_price,
            timestamp: Utc::now(),
        })
    }

    fn supports_linked_orders(&self) -> bool {
        false
    }

    fn symbol_codec(&self) -> &SymbolCodec {
        &self.codec
    }

    fn tick_table(&self) -> &TickTable {
        &self.ticks
    }

    fn name(&self) -> &str {
        if self.config.paper {
            "Futu OpenD (simulate)"
        } else {
            "Futu OpenD"
        }
    }
}

/// Session transport against the OpenD gateway: liveness via the global
/// state endpoint, authentication via trade unlock.
pub struct FutuTransport {
    client: Client,
    base_url: String,
    trade_password: Option<String>,
}

impl FutuTransport {
    pub fn new(config: &FutuConfig, trade_password: Option<String>) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VenueError::Connectivity(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            trade_password,
        })
    }
}

#[async_trait]
impl SessionTransport for FutuTransport {
    async fn authenticate(&self) -> Result<(), VenueError> {
        self.ping().await?;

        if let Some(password) = &self.trade_password {
            let url = format!("{}/trade/unlock", self.base_url);
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "pwd": password }))
                .send()
                .await
                .map_err(map_transport_err)?;

            let envelope: OpendResponse<serde_json::Value> =
                resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
            if envelope.ret_code != 0 {
                return Err(VenueError::Authentication(
                    envelope
                        .ret_msg
                        .unwrap_or_else(|| "trade unlock failed".to_string()),
                ));
            }
            info!("trade unlocked");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/global-state", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_err)?;

        let envelope: OpendResponse<serde_json::Value> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        if envelope.ret_code != 0 {
            return Err(VenueError::Connectivity(
                envelope
                    .ret_msg
                    .unwrap_or_else(|| "OpenD unavailable".to_string()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remark_truncation() {
        let long = "x".repeat(100);
        assert_eq!(truncate_remark(&long).len(), REMARK_LIMIT);
        assert_eq!(truncate_remark("short"), "short");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("SUBMITTED"), OrderStatus::Acknowledged);
        assert_eq!(map_status("FILLED_PART"), OrderStatus::PartiallyFilled);
        assert_eq!(map_status("FILLED_ALL"), OrderStatus::Filled);
        assert_eq!(map_status("CANCELLED_ALL"), OrderStatus::Cancelled);
        assert_eq!(map_status("FAILED"), OrderStatus::Rejected);
    }

    #[test]
    fn test_symbol_wire_form() {
        let codec = SymbolCodec::new("HK.", 5);
        let symbol = Symbol::normalize("700").unwrap();
        assert_eq!(codec.to_venue(&symbol), "HK.00700");
    }
}
