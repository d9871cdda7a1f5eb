//! Shared foundations: error taxonomy, daemon configuration and deadline
//! arithmetic.

pub mod clock;
pub mod config;
pub mod errors;
