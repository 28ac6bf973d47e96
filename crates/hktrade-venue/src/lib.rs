//! Venue adapters.
//!
//! Each adapter implements [`hktrade_core::Venue`] over a broker's wire
//! API, behind the shared session manager:
//! - [`FutuVenue`]: OpenD gateway bridge; no native linked orders.
//! - [`IbkrVenue`]: Client Portal REST; native bracket orders.
//! - [`SimVenue`]: in-memory venue for paper mode and tests.

mod session;
mod futu;
mod ibkr;
mod sim;

pub use session::{
    KeepaliveConfig, Session, SessionManager, SessionState, SessionTransport,
};
pub use futu::{FutuConfig, FutuTransport, FutuVenue};
pub use ibkr::{IbkrConfig, IbkrTransport, IbkrVenue};
pub use sim::SimVenue;
