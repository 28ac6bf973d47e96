//! Venue trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VenueError;
use crate::types::{
    AccountSummary, BrokerSnapshot, Quote, Symbol, SymbolCodec, TickTable, VenueOrder,
    VenueOrderRequest, VenuePosition,
};

/// Venue acknowledgment of an order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueAck {
    pub venue_order_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Venue accepted the cancel
    Cancelled,
    /// The order had already reached a terminal state (race with a fill)
    AlreadyTerminal,
}

/// Trait for brokerage venue adapters.
///
/// Adapters hide per-venue differences: wire symbol format, order
/// semantics, and whether linked entry/stop/target orders exist natively.
/// Session establishment is owned by the session manager; every operation
/// here assumes a live session and fails fast with
/// [`VenueError::NotAuthenticated`] when there is none.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Submit a new order.
    ///
    /// A synchronous decline maps to [`VenueError::Rejected`]; transient
    /// failures surface as connectivity/timeout errors and are left to
    /// reconciliation, never retried here.
    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueAck, VenueError>;

    /// Cancel an acknowledged order.
    async fn cancel_order(&self, venue_order_id: &str) -> Result<CancelOutcome, VenueError>;

    /// Fetch the venue's view of one order.
    async fn get_order(&self, venue_order_id: &str) -> Result<VenueOrder, VenueError>;

    /// Fetch all open orders.
    async fn get_open_orders(&self) -> Result<Vec<VenueOrder>, VenueError>;

    /// Fetch all positions.
    async fn get_positions(&self) -> Result<Vec<VenuePosition>, VenueError>;

    /// Fetch the account summary.
    async fn get_account(&self) -> Result<AccountSummary, VenueError>;

    /// Fetch a quote for one symbol.
    async fn get_quote(&self, symbol: &Symbol) -> Result<Quote, VenueError>;

    /// One logical read of venue truth for reconciliation.
    async fn snapshot(&self) -> Result<BrokerSnapshot, VenueError> {
        let positions = self.get_positions().await?;
        let open_orders = self.get_open_orders().await?;
        Ok(BrokerSnapshot::new(positions, open_orders))
    }

    /// Whether the venue enforces entry/stop/target linkage natively.
    /// When false, exits are emulated by the stop/target supervisor.
    fn supports_linked_orders(&self) -> bool;

    /// The venue's symbol wire format.
    fn symbol_codec(&self) -> &SymbolCodec;

    /// The venue's tick-size tiers.
    fn tick_table(&self) -> &TickTable;

    /// Get the venue name.
    fn name(&self) -> &str;
}

/// Helper for adapters stamping acknowledgments.
impl VenueAck {
    pub fn new(venue_order_id: impl Into<String>) -> Self {
        Self {
            venue_order_id: venue_order_id.into(),
            accepted_at: Utc::now(),
        }
    }
}
