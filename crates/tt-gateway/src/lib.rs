//! WebSocket Gateway (component E) and HTTP Surface (component F): the
//! only network-facing components of the server. See §4.E, §4.F.

pub mod dispatch;
pub mod housekeeping;
pub mod http;
pub mod origin;
pub mod ownership;
pub mod protocol;
pub mod router;
pub mod session;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;
pub mod ws;

pub use router::router;
pub use state::GatewayState;
