//! Shared types, configuration, and error kinds for the terminal multiplexer
//! server. Every other `tt-*` crate depends on this one; it owns no I/O.

pub mod config;
pub mod env_sanitize;
pub mod error;
pub mod limits;
pub mod naming;
pub mod types;

pub use error::{ErrorKind, ServerError, SpawnError};
pub use types::*;
