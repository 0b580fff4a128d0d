//! Spawn Pipeline (component C): validation, rate limiting, correlation,
//! and atomic publication of new terminals. See §4.C.

pub mod pending;
pub mod pipeline;
pub mod rate_limit;
pub mod validate;

pub use pending::PendingSpawns;
pub use pipeline::SpawnPipeline;
pub use rate_limit::SpawnRateLimiter;
pub use validate::{validate, ValidatedSpawn};
