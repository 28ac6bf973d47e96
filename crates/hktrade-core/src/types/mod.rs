//! Core data types for the execution core.

mod symbol;
mod tick;
mod order;
mod position;
mod snapshot;
mod quote;

pub use symbol::{Symbol, SymbolCodec};
pub use tick::{TickTable, TickTier};
pub use order::{
    Bracket, Order, OrderKind, OrderStatus, Side, TradeIntent, VenueOrderRequest,
};
pub use position::Position;
pub use snapshot::{
    BrokerSnapshot, Discrepancy, DiscrepancyKind, VenueOrder, VenuePosition,
};
pub use quote::{AccountSummary, Quote};
