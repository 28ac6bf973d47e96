//! Interactive Brokers venue adapter via the Client Portal gateway.
//!
//! The Client Portal supports native bracket orders: entry, stop and
//! target are submitted as one linked group and the linkage is enforced
//! venue-side.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use hktrade_core::error::VenueError;
use hktrade_core::traits::{CancelOutcome, Venue, VenueAck};
use hktrade_core::types::{
    AccountSummary, OrderKind, OrderStatus, Quote, Side, Symbol, SymbolCodec, TickTable,
    VenueOrder, VenueOrderRequest, VenuePosition,
};

use crate::session::{Session, SessionTransport};

/// Client Portal gateway configuration.
#[derive(Debug, Clone)]
pub struct IbkrConfig {
    /// Gateway root, e.g. `https://localhost:5000/v1/api`
    pub base_url: String,
    /// Account id; discovered from the gateway when unset
    pub account_id: Option<String>,
    pub paper: bool,
    pub request_timeout_secs: u64,
}

impl IbkrConfig {
    pub fn from_env() -> Result<Self, VenueError> {
        let base_url = std::env::var("IBKR_GATEWAY_URL")
            .unwrap_or_else(|_| "https://localhost:5000/v1/api".to_string());
        let account_id = std::env::var("IBKR_ACCOUNT_ID").ok();
        let paper = std::env::var("IBKR_PAPER")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self {
            base_url,
            account_id,
            paper,
            request_timeout_secs: 15,
        })
    }
}

// The gateway terminates TLS with a self-signed certificate.
fn build_client(timeout_secs: u64) -> Result<Client, VenueError> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| VenueError::Connectivity(e.to_string()))
}

fn map_transport_err(e: reqwest::Error) -> VenueError {
    if e.is_timeout() {
        VenueError::Timeout
    } else {
        VenueError::Connectivity(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CpOrder {
    #[serde(rename = "orderId")]
    order_id: Value,
    ticker: Option<String>,
    side: String,
    #[serde(rename = "totalSize", default)]
    total_size: Option<Value>,
    #[serde(rename = "filledQuantity", default)]
    filled_quantity: Option<Value>,
    #[serde(rename = "avgPrice", default)]
    avg_price: Option<String>,
    #[serde(default)]
    price: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CpOrdersEnvelope {
    #[serde(default)]
    orders: Vec<CpOrder>,
}

#[derive(Debug, Deserialize)]
struct CpPosition {
    #[serde(default)]
    ticker: Option<String>,
    #[serde(rename = "contractDesc", default)]
    contract_desc: Option<String>,
    position: Decimal,
    #[serde(rename = "avgCost", default)]
    avg_cost: Decimal,
    #[serde(rename = "mktPrice", default)]
    mkt_price: Decimal,
    #[serde(rename = "unrealizedPnl", default)]
    unrealized_pnl: Decimal,
}

fn decimal_from(value: &Value) -> Decimal {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64_retain)
            .unwrap_or(Decimal::ZERO),
        Value::String(s) => s.parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn map_cp_status(status: &str, filled: Decimal, total: Decimal) -> OrderStatus {
    match status {
        "Filled" => OrderStatus::Filled,
        "Cancelled" | "ApiCancelled" => OrderStatus::Cancelled,
        "Inactive" => OrderStatus::Rejected,
        _ if filled > Decimal::ZERO && filled < total => OrderStatus::PartiallyFilled,
        "PendingSubmit" | "PreSubmitted" | "Submitted" | "PendingCancel" => {
            OrderStatus::Acknowledged
        }
        _ => OrderStatus::Acknowledged,
    }
}

/// HKEX venue via the IBKR Client Portal gateway.
pub struct IbkrVenue {
    config: IbkrConfig,
    client: Client,
    session: Arc<Session>,
    codec: SymbolCodec,
    ticks: TickTable,
    account: Mutex<Option<String>>,
    conids: Mutex<HashMap<Symbol, i64>>,
}

impl IbkrVenue {
    pub fn new(config: IbkrConfig, session: Arc<Session>) -> Result<Self, VenueError> {
        let client = build_client(config.request_timeout_secs)?;
        let account = Mutex::new(config.account_id.clone());
        Ok(Self {
            config,
            client,
            session,
            codec: SymbolCodec::new("", 4),
            ticks: TickTable::hkex(),
            account,
            conids: Mutex::new(HashMap::new()),
        })
    }

    /// Override the tick tiers (defaults to the HKEX table).
    pub fn with_tick_table(mut self, ticks: TickTable) -> Self {
        self.ticks = ticks;
        self
    }

    async fn account_id(&self) -> Result<String, VenueError> {
        if let Some(id) = self.account.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(id);
        }

        let url = format!("{}/iserver/accounts", self.config.base_url);
        let resp = self.client.get(&url).send().await.map_err(map_transport_err)?;
        let body: Value = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        let id = body
            .get("accounts")
            .and_then(|a| a.as_array())
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| VenueError::Api("no accounts returned by gateway".to_string()))?;

        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        Ok(id)
    }

    /// Resolve and cache the contract id for a symbol.
    async fn resolve_conid(&self, symbol: &Symbol) -> Result<i64, VenueError> {
        if let Some(&conid) = self
            .conids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(symbol)
        {
            return Ok(conid);
        }

        let url = format!("{}/iserver/secdef/search", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "symbol": self.codec.to_venue(symbol),
                "secType": "STK",
            }))
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: Value = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        let conid = body
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.get("conid"))
            .and_then(|c| match c {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .ok_or_else(|| VenueError::Api(format!("no contract found for {symbol}")))?;

        self.conids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(symbol.clone(), conid);
        Ok(conid)
    }

    fn parse_order(&self, o: CpOrder) -> Result<VenueOrder, VenueError> {
        let ticker = o
            .ticker
            .ok_or_else(|| VenueError::Api("order without ticker".to_string()))?;
        let symbol = self.codec.parse(&ticker)?;
        let side = match o.side.as_str() {
            "BUY" | "B" => Side::Buy,
            "SELL" | "S" => Side::Sell,
            other => return Err(VenueError::Api(format!("unknown side: {other}"))),
        };

        let quantity = o.total_size.as_ref().map(decimal_from).unwrap_or(Decimal::ZERO);
        let filled = o
            .filled_quantity
            .as_ref()
            .map(decimal_from)
            .unwrap_or(Decimal::ZERO);
        let status = map_cp_status(o.status.as_deref().unwrap_or(""), filled, quantity);

        Ok(VenueOrder {
            venue_order_id: match &o.order_id {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            symbol,
            side,
            quantity,
            filled_quantity: filled,
            filled_avg_price: o.avg_price.as_deref().and_then(|p| p.parse().ok()),
            price: o.price.as_deref().and_then(|p| p.parse().ok()),
            status,
        })
    }

    /// Walk the confirm-reply dance until the gateway hands back an order id.
    async fn confirm_until_placed(&self, mut body: Value) -> Result<String, VenueError> {
        for _ in 0..3 {
            let first = body
                .as_array()
                .and_then(|a| a.first())
                .cloned()
                .ok_or_else(|| VenueError::Api("empty order response".to_string()))?;

            if let Some(order_id) = first.get("order_id").and_then(|v| v.as_str()) {
                return Ok(order_id.to_string());
            }
            if let Some(order_id) = first.get("order_id").and_then(|v| v.as_i64()) {
                return Ok(order_id.to_string());
            }

            // A reply id means the gateway wants a confirmation of its
            // order warnings before placing.
            let reply_id = first
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| VenueError::Rejected {
                    reason: first
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("order declined")
                        .to_string(),
                })?;

            debug!(reply_id, "confirming order warnings");
            let url = format!("{}/iserver/reply/{}", self.config.base_url, reply_id);
            let resp = self
                .client
                .post(&url)
                .json(&json!({ "confirmed": true }))
                .send()
                .await
                .map_err(map_transport_err)?;
            body = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        }

        Err(VenueError::Api("confirm loop did not settle".to_string()))
    }
}

#[async_trait]
impl Venue for IbkrVenue {
    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueAck, VenueError> {
        self.session.require_live()?;

        let account = self.account_id().await?;
        let conid = self.resolve_conid(&request.symbol).await?;

        let side = match request.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let mut parent = json!({
            "conid": conid,
            "side": side,
            "quantity": request.quantity,
            "orderType": match request.kind {
                OrderKind::Market => "MKT",
                OrderKind::Limit => "LMT",
            },
            "tif": "DAY",
            "cOID": request.client_ref,
            "referrer": request.remark,
        });
        if let Some(price) = request.limit_price {
            parent["price"] = json!(price);
        }

        let mut orders = vec![parent];
        if let Some(bracket) = &request.bracket {
            let exit_side = match request.side {
                Side::Buy => "SELL",
                Side::Sell => "BUY",
            };
            orders.push(json!({
                "conid": conid,
                "side": exit_side,
                "quantity": request.quantity,
                "orderType": "STP",
                "price": bracket.stop,
                "tif": "GTC",
                "parentId": request.client_ref,
            }));
            if let Some(target) = bracket.target {
                orders.push(json!({
                    "conid": conid,
                    "side": exit_side,
                    "quantity": request.quantity,
                    "orderType": "LMT",
                    "price": target,
                    "tif": "GTC",
                    "parentId": request.client_ref,
                }));
            }
        }

        debug!(conid, side, legs = orders.len(), "placing Client Portal order group");

        let url = format!("{}/iserver/account/{}/orders", self.config.base_url, account);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "orders": orders }))
            .send()
            .await
            .map_err(map_transport_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Rejected {
                reason: format!("{status}: {text}"),
            });
        }

        let body: Value = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        let order_id = self.confirm_until_placed(body).await?;

        info!(order_id, "Client Portal order submitted");
        Ok(VenueAck::new(order_id))
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelOutcome, VenueError> {
        self.session.require_live()?;

        let account = self.account_id().await?;
        let url = format!(
            "{}/iserver/account/{}/order/{}",
            self.config.base_url, account, venue_order_id
        );
        let resp = self.client.delete(&url).send().await.map_err(map_transport_err)?;

        if resp.status().is_success() {
            info!(order_id = venue_order_id, "Client Portal order cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        let order = self.get_order(venue_order_id).await?;
        if order.status.is_terminal() {
            Ok(CancelOutcome::AlreadyTerminal)
        } else {
            Err(VenueError::Api(format!(
                "cancel declined for order {venue_order_id}"
            )))
        }
    }

    async fn get_order(&self, venue_order_id: &str) -> Result<VenueOrder, VenueError> {
        self.session.require_live()?;

        let url = format!(
            "{}/iserver/account/order/status/{}",
            self.config.base_url, venue_order_id
        );
        let resp = self.client.get(&url).send().await.map_err(map_transport_err)?;

        if !resp.status().is_success() {
            return Err(VenueError::OrderNotFound(venue_order_id.to_string()));
        }

        let order: CpOrder = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        self.parse_order(order)
    }

    async fn get_open_orders(&self) -> Result<Vec<VenueOrder>, VenueError> {
        self.session.require_live()?;

        let url = format!("{}/iserver/account/orders", self.config.base_url);
        let resp = self.client.get(&url).send().await.map_err(map_transport_err)?;
        let body: CpOrdersEnvelope =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        let mut open = Vec::new();
        for o in body.orders {
            let parsed = self.parse_order(o)?;
            if parsed.status.is_active() {
                open.push(parsed);
            }
        }
        Ok(open)
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        self.session.require_live()?;

        let account = self.account_id().await?;
        let url = format!("{}/portfolio/{}/positions/0", self.config.base_url, account);
        let resp = self.client.get(&url).send().await.map_err(map_transport_err)?;
        let body: Vec<CpPosition> =
            resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        let mut positions = Vec::new();
        for p in body {
            if p.position == Decimal::ZERO {
                continue;
            }
            let code = p
                .ticker
                .or(p.contract_desc)
                .ok_or_else(|| VenueError::Api("position without ticker".to_string()))?;
            positions.push(VenuePosition {
                symbol: self.codec.parse(&code)?,
                quantity: p.position,
                avg_cost: p.avg_cost,
                current_price: p.mkt_price,
                unrealized_pnl: p.unrealized_pnl,
            });
        }
        Ok(positions)
    }

    async fn get_account(&self) -> Result<AccountSummary, VenueError> {
        self.session.require_live()?;

        let account = self.account_id().await?;
        let url = format!("{}/portfolio/{}/summary", self.config.base_url, account);
        let resp = self.client.get(&url).send().await.map_err(map_transport_err)?;
        let body: Value = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;

        let amount = |tag: &str| -> Decimal {
            body.get(tag)
                .and_then(|v| v.get("amount"))
                .map(decimal_from)
                .unwrap_or(Decimal::ZERO)
        };

        let equity = amount("netliquidation");
        let unrealized = amount("unrealizedpnl");
        let daily_pnl_pct = if equity > Decimal::ZERO {
            unrealized / equity
        } else {
            Decimal::ZERO
        };

        Ok(AccountSummary {
            equity,
            cash: amount("totalcashvalue"),
            buying_power: amount("buyingpower"),
            daily_pnl_pct,
            currency: "HKD".to_string(),
            paper: self.config.paper,
        })
    }

    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, VenueError> {
        self.session.require_live()?;

        let conid = self.resolve_conid(symbol).await?;
        let url = format!("{}/iserver/marketdata/snapshot", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("conids", conid.to_string()),
                ("fields", "31,84,86,87,70,71,7295,7296".to_string()),
            ])
            .send()
            .await
            .map_err(map_transport_err)?;

        let body: Vec<Value> = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        let row = body
            .first()
            .ok_or_else(|| VenueError::Api("empty snapshot".to_string()))?;

        let field = |id: &str| -> Decimal { row.get(id).map(decimal_from).unwrap_or(dec!(0)) };

        Ok(Quote {
            symbol: symbol.clone(),
            last: field("31"),
            bid: field("84"),
            ask: field("86"),
            volume: row
                .get("87")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            high: field("70"),
            low: field("71"),
            open: field("7295"),
            prev_close: field("7296"),
            timestamp: Utc::now(),
        })
    }

    fn supports_linked_orders(&self) -> bool {
        true
    }

    fn symbol_codec(&self) -> &SymbolCodec {
        &self.codec
    }

    fn tick_table(&self) -> &TickTable {
        &self.ticks
    }

    fn name(&self) -> &str {
        if self.config.paper {
            "IBKR Client Portal (paper)"
        } else {
            "IBKR Client Portal"
        }
    }
}

/// Session transport against the Client Portal gateway.
pub struct IbkrTransport {
    client: Client,
    base_url: String,
}

impl IbkrTransport {
    pub fn new(config: &IbkrConfig) -> Result<Self, VenueError> {
        Ok(Self {
            client: build_client(config.request_timeout_secs)?,
            base_url: config.base_url.clone(),
        })
    }

    async fn auth_status(&self) -> Result<bool, VenueError> {
        let url = format!("{}/iserver/auth/status", self.base_url);
        let resp = self.client.post(&url).send().await.map_err(map_transport_err)?;
        let body: Value = resp.json().await.map_err(|e| VenueError::Api(e.to_string()))?;
        Ok(body
            .get("authenticated")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }
}

#[async_trait]
impl SessionTransport for IbkrTransport {
    async fn authenticate(&self) -> Result<(), VenueError> {
        if self.auth_status().await? {
            return Ok(());
        }

        let url = format!("{}/iserver/reauthenticate", self.base_url);
        self.client.post(&url).send().await.map_err(map_transport_err)?;

        if self.auth_status().await? {
            Ok(())
        } else {
            Err(VenueError::Authentication(
                "gateway session not authenticated; complete the browser login".to_string(),
            ))
        }
    }

    async fn ping(&self) -> Result<(), VenueError> {
        let url = format!("{}/tickle", self.base_url);
        self.client.post(&url).send().await.map_err(map_transport_err)?;

        if self.auth_status().await? {
            Ok(())
        } else {
            Err(VenueError::NotAuthenticated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp_status_mapping() {
        assert_eq!(
            map_cp_status("Submitted", dec!(0), dec!(100)),
            OrderStatus::Acknowledged
        );
        assert_eq!(
            map_cp_status("Submitted", dec!(40), dec!(100)),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(map_cp_status("Filled", dec!(100), dec!(100)), OrderStatus::Filled);
        assert_eq!(map_cp_status("Inactive", dec!(0), dec!(100)), OrderStatus::Rejected);
    }

    #[test]
    fn test_symbol_wire_form_is_zero_padded() {
        let codec = SymbolCodec::new("", 4);
        let symbol = Symbol::normalize("700").unwrap();
        assert_eq!(codec.to_venue(&symbol), "0700");
        assert_eq!(codec.parse("0700").unwrap(), symbol);
    }

    #[test]
    fn test_decimal_from_mixed_json() {
        assert_eq!(decimal_from(&json!(378.5)), dec!(378.5));
        assert_eq!(decimal_from(&json!("378.10")), dec!(378.10));
        assert_eq!(decimal_from(&json!(null)), Decimal::ZERO);
    }
}
