//! PTY/Mux Handler (component A). Owns OS child processes; translates
//! byte/resize/signal events; guarantees cleanup. See §4.A.

pub mod command;
pub mod handler;

pub use handler::{PtyError, PtyHandler, SpawnConfig, SpawnOutcome, WriteOutcome};
