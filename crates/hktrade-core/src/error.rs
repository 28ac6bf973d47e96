//! Error types for the execution core.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::OrderStatus;

/// Top-level execution error.
#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Safety gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from symbol and price normalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Invalid price: {0} (must be positive)")]
    InvalidPrice(Decimal),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),
}

/// Safety-gate rejection. Produced before any venue call is made.
#[derive(Error, Debug, Clone)]
pub enum GateError {
    #[error("Intent rejected: {reason}")]
    Rejected { reason: String },
}

/// Venue-facing errors.
#[derive(Error, Debug)]
pub enum VenueError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Session is not live. All mutating operations fail fast with this
    /// until a reconnect succeeds.
    #[error("Not authenticated: session is not live")]
    NotAuthenticated,

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Venue call timed out")]
    Timeout,

    /// The venue explicitly declined the order. Final; never retried.
    #[error("Order rejected by venue: {reason}")]
    Rejected { reason: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Normalization error: {0}")]
    Normalize(#[from] NormalizeError),
}

impl VenueError {
    /// Whether the call may never have reached the venue. Order submission
    /// must not be retried on these; resolution is deferred to
    /// reconciliation.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Connectivity(_) | VenueError::Timeout)
    }
}

/// Order-lifecycle and ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A fatal discrepancy is unacknowledged; new submissions are blocked.
    #[error("Trading halted pending operator acknowledgment")]
    Halted,

    #[error("Engine is shutting down; no new intents accepted")]
    ShuttingDown,

    #[error("Illegal order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Venue order id already assigned for order {order_id}")]
    VenueIdReassigned { order_id: Uuid },

    #[error("Order not cancelable from state {status}")]
    NotCancelable { status: OrderStatus },

    #[error("Unknown order: {0}")]
    UnknownOrder(Uuid),

    #[error("No open position for {0}")]
    PositionNotFound(String),
}

/// Result type alias for execution operations.
pub type TradeResult<T> = Result<T, TradeError>;
