//! Check definitions and the directory-backed store that loads them.

pub mod definition;
pub mod store;

pub use definition::{CheckDefinition, CheckId, CheckSet, CheckSetDiff};
pub use store::{CheckDefaults, CheckStore, ConfigError, StoreLoad};
