//! In-memory venue for paper mode and tests.
//!
//! Fills, rejections and connectivity faults are scripted by the caller,
//! which makes it the test double for everything above the venue
//! boundary: lifecycle, supervisor and reconciliation behavior can be
//! exercised without a gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use hktrade_core::error::VenueError;
use hktrade_core::traits::{CancelOutcome, Venue, VenueAck};
use hktrade_core::types::{
    AccountSummary, OrderStatus, Quote, Side, Symbol, SymbolCodec, TickTable, VenueOrder,
    VenueOrderRequest, VenuePosition,
};

#[derive(Debug, Default)]
struct SimState {
    orders: Vec<VenueOrder>,
    positions: HashMap<Symbol, VenuePosition>,
    quotes: HashMap<Symbol, Quote>,
    next_id: u64,
    place_calls: u64,
    reject_next: Option<String>,
    timeout_next: bool,
}

/// Scriptable in-memory venue.
pub struct SimVenue {
    state: Mutex<SimState>,
    account: Mutex<AccountSummary>,
    authenticated: AtomicBool,
    linked_orders: bool,
    auto_fill: bool,
    codec: SymbolCodec,
    ticks: TickTable,
}

impl SimVenue {
    /// A venue without native linked orders (the supervisor path).
    pub fn new() -> Self {
        Self::with_capabilities(false, false)
    }

    /// Override the tick table (defaults to the HKEX tiers).
    pub fn with_tick_table(mut self, ticks: TickTable) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn with_capabilities(linked_orders: bool, auto_fill: bool) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            account: Mutex::new(AccountSummary {
                equity: dec!(1000000),
                cash: dec!(1000000),
                buying_power: dec!(1000000),
                daily_pnl_pct: Decimal::ZERO,
                currency: "HKD".to_string(),
                paper: true,
            }),
            authenticated: AtomicBool::new(true),
            linked_orders,
            auto_fill,
            codec: SymbolCodec::new("HK.", 5),
            ticks: TickTable::hkex(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- test scripting -------------------------------------------------

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Decline the next order synchronously with the given reason.
    pub fn reject_next_order(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    /// Drop the next placement on the floor: the caller sees a timeout
    /// and the venue keeps no record of the order.
    pub fn timeout_next_order(&self) {
        self.lock().timeout_next = true;
    }

    pub fn place_call_count(&self) -> u64 {
        self.lock().place_calls
    }

    pub fn set_quote(&self, symbol: &Symbol, last: Decimal) {
        self.lock().quotes.insert(
            symbol.clone(),
            Quote {
                symbol: symbol.clone(),
                last,
                bid: last,
                ask: last,
                volume: 0,
                high: last,
                low: last,
                open: last,
                prev_close: last,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn set_account(&self, account: AccountSummary) {
        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = account;
    }

    pub fn seed_position(&self, symbol: &Symbol, quantity: Decimal, avg_cost: Decimal) {
        self.lock().positions.insert(
            symbol.clone(),
            VenuePosition {
                symbol: symbol.clone(),
                quantity,
                avg_cost,
                current_price: avg_cost,
                unrealized_pnl: Decimal::ZERO,
            },
        );
    }

    /// Forget a position venue-side without touching anything else
    /// (fabricates the phantom-position scenario).
    pub fn drop_position(&self, symbol: &Symbol) {
        self.lock().positions.remove(symbol);
    }

    /// Fill an acknowledged order and update venue positions.
    pub fn fill_order(&self, venue_order_id: &str, quantity: Decimal, price: Decimal) {
        let mut state = self.lock();
        let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.venue_order_id == venue_order_id)
        else {
            return;
        };

        order.filled_quantity += quantity;
        let filled = order.filled_quantity;
        order.filled_avg_price = Some(price);
        order.status = if filled >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        let symbol = order.symbol.clone();
        let signed = order.side.sign() * quantity;
        let entry = state.positions.entry(symbol.clone()).or_insert(VenuePosition {
            symbol,
            quantity: Decimal::ZERO,
            avg_cost: price,
            current_price: price,
            unrealized_pnl: Decimal::ZERO,
        });
        entry.quantity += signed;
        entry.current_price = price;
        let flat = entry.quantity == Decimal::ZERO;
        if flat {
            let symbol = entry.symbol.clone();
            state.positions.remove(&symbol);
        }
    }

    /// Expire an order venue-side (it will vanish from open orders).
    pub fn expire_order(&self, venue_order_id: &str) {
        let mut state = self.lock();
        if let Some(order) = state
            .orders
            .iter_mut()
            .find(|o| o.venue_order_id == venue_order_id)
        {
            order.status = OrderStatus::Expired;
        }
    }
}

impl Default for SimVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Venue for SimVenue {
    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueAck, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        let mut state = self.lock();
        state.place_calls += 1;

        if state.timeout_next {
            state.timeout_next = false;
            return Err(VenueError::Timeout);
        }
        if let Some(reason) = state.reject_next.take() {
            return Err(VenueError::Rejected { reason });
        }

        state.next_id += 1;
        let venue_order_id = format!("SIM-{}", state.next_id);
        let order = VenueOrder {
            venue_order_id: venue_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            filled_quantity: Decimal::ZERO,
            filled_avg_price: None,
            price: request.limit_price,
            status: OrderStatus::Acknowledged,
        };
        state.orders.push(order);
        drop(state);

        if self.auto_fill {
            let price = request.limit_price.unwrap_or_else(|| {
                self.lock()
                    .quotes
                    .get(&request.symbol)
                    .map(|q| q.last)
                    .unwrap_or(Decimal::ZERO)
            });
            self.fill_order(&venue_order_id, request.quantity, price);
        }

        Ok(VenueAck::new(venue_order_id))
    }

    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelOutcome, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        let mut state = self.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.venue_order_id == venue_order_id)
            .ok_or_else(|| VenueError::OrderNotFound(venue_order_id.to_string()))?;

        if order.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        order.status = OrderStatus::Cancelled;
        Ok(CancelOutcome::Cancelled)
    }

    async fn get_order(&self, venue_order_id: &str) -> Result<VenueOrder, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        self.lock()
            .orders
            .iter()
            .find(|o| o.venue_order_id == venue_order_id)
            .cloned()
            .ok_or_else(|| VenueError::OrderNotFound(venue_order_id.to_string()))
    }

    async fn get_open_orders(&self) -> Result<Vec<VenueOrder>, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.status.is_active())
            .cloned()
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        Ok(self.lock().positions.values().cloned().collect())
    }

    async fn get_account(&self) -> Result<AccountSummary, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        Ok(self.account.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, VenueError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(VenueError::NotAuthenticated);
        }

        self.lock()
            .quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::Api(format!("no quote for {symbol}")))
    }

    fn supports_linked_orders(&self) -> bool {
        self.linked_orders
    }

    fn symbol_codec(&self) -> &SymbolCodec {
        &self.codec
    }

    fn tick_table(&self) -> &TickTable {
        &self.ticks
    }

    fn name(&self) -> &str {
        "Sim Venue"
    }
}
