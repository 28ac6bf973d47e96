//! CLI command implementations.

pub mod run;
pub mod close_all;
pub mod validate;

mod wiring;

pub(crate) use wiring::{build_stack, Stack};
