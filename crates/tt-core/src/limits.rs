//! Numeric constants from the design that are not worth putting behind
//! config for the sake of configurability alone; several of these (the
//! debounce window, the kill grace) are fixed design constants per spec.

use std::time::Duration;

pub const NAME_MAX_LEN: usize = 50;
pub const COMMAND_MAX_LEN: usize = 10_000;
pub const COLS_RANGE: std::ops::RangeInclusive<u16> = 20..=300;
pub const ROWS_RANGE: std::ops::RangeInclusive<u16> = 10..=100;

pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(300);
pub const KILL_GRACE: Duration = Duration::from_secs(5);
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);
pub const MALFORMED_WINDOW: Duration = Duration::from_secs(60);
pub const MALFORMED_THRESHOLD: u32 = 10;

pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_PENDING_SPAWN_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_RATE_LIMIT_PER_WINDOW: u32 = 10;
pub const DEFAULT_RATE_LIMIT_BURST: f64 = 3.0;

pub const MANAGED_SESSION_PREFIX: &str = "tt-";
pub const DEFAULT_PORT: u16 = 8127;

/// Bytes buffered per disconnected, non-mux terminal while waiting for
/// reconnect. See the open question on `useMux=false` detach-with-grace
/// in DESIGN.md.
pub const DISCONNECT_REPLAY_BUFFER: usize = 65_536;
