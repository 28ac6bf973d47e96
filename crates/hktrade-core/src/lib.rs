//! Core types and traits for the trade execution core.
//!
//! This crate provides the foundational building blocks including:
//! - Symbol and tick-size normalization
//! - Order, position and trade-intent types
//! - Venue snapshot and discrepancy types
//! - The `Venue` trait implemented by broker adapters

pub mod types;
pub mod traits;
pub mod error;

pub use error::{TradeError, TradeResult};
pub use types::*;
pub use traits::*;
