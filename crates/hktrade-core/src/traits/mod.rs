//! Core traits implemented by venue adapters.

mod venue;

pub use venue::{CancelOutcome, Venue, VenueAck};
