//! Terminal Registry (component B): the authoritative map of Terminal
//! entities, their state machine, and the event bus. See §4.B.

pub mod disconnect_buffer;
pub mod registry;

pub use disconnect_buffer::DisconnectBuffer;
pub use registry::{SendOutcome, TerminalRegistry};
