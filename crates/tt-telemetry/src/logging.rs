use tracing_subscriber::{fmt, EnvFilter};

/// Initialize human-readable logging. `LOG_LEVEL` (already resolved by
/// `tt_core::config::Config`) is the fallback filter when `RUST_LOG` is
/// unset. Safe to call more than once — later calls are no-ops.
pub fn init(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init();
    }
}
