//! The trade execution engine.
//!
//! - [`Ledger`]: the internal record of orders, positions and the
//!   append-only discrepancy log, shared under a read/write lock.
//! - [`ExecutionEngine`]: the order lifecycle manager; a single intent is
//!   processed start-to-finish under a per-symbol lock.
//! - [`StopTargetSupervisor`]: emulated protective exits for venues
//!   without native linked orders.
//! - [`Reconciler`]: the periodic ledger/venue diff.

mod ledger;
mod supervisor;
mod lifecycle;
mod reconcile;

pub use ledger::{FillEffect, Ledger};
pub use supervisor::StopTargetSupervisor;
pub use lifecycle::ExecutionEngine;
pub use reconcile::{ReconcileConfig, ReconcileReport, Reconciler};
