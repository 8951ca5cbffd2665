//! Shared foundation for the steward workspace: configuration, error type,
//! channel identifiers, user-timezone helpers, and the atomic state-file
//! pattern every JSON-backed singleton uses.

pub mod config;
pub mod error;
pub mod statefile;
pub mod timezone;
pub mod types;

pub use error::{Result, StewardError};
