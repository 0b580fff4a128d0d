//! Name generation for terminals and mux sessions. See §4.B (registry name
//! generation) and §6 (mux session naming) of the design.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Lowercase alphanumeric suffix drawn from a fresh UUID; good enough for
/// "uniqueness-random" per the design without pulling in a `rand` dependency.
fn random_suffix(len: usize) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).take(len).collect()
}

/// `tt-<type-abbrev>-<3-char suffix>`, the reserved prefix that marks a
/// mux session as managed by this server.
pub fn mux_session_name(managed_prefix: &str, type_abbrev: &str) -> String {
    format!("{managed_prefix}{type_abbrev}-{}", random_suffix(3))
}

/// Per-type monotonic counter used to generate `<abbrev>-<n>` names when the
/// client does not supply one. The counter is seeded at startup by scanning
/// existing terminals (see [`NameCounters::seed`]) so restarts do not reuse
/// names that are still live in recovered mux sessions.
#[derive(Debug, Default)]
pub struct NameCounters {
    counters: std::sync::Mutex<HashMap<String, AtomicU64>>,
}

impl NameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or raise) the counter for `abbrev` so the next generated name
    /// is strictly greater than `floor`.
    pub fn seed(&self, abbrev: &str, floor: u64) {
        let mut map = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map
            .entry(abbrev.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        entry.fetch_max(floor, Ordering::SeqCst);
    }

    /// Next `<abbrev>-<n>` name. The caller is responsible for retrying with
    /// a fresh call if the name collides with a live terminal (collisions
    /// are vanishingly rare since the counter only increases).
    pub fn next(&self, abbrev: &str) -> String {
        let mut map = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let entry = map
            .entry(abbrev.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let n = entry.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{abbrev}-{n}")
    }
}

/// Parse the trailing `-<n>` counter out of a generated name, used to seed
/// [`NameCounters`] from existing terminals on boot.
pub fn trailing_counter(name: &str) -> Option<u64> {
    name.rsplit_once('-').and_then(|(_, n)| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_session_name_has_expected_shape() {
        let name = mux_session_name("tt-", "sh");
        assert!(name.starts_with("tt-sh-"));
        assert_eq!(name.len(), "tt-sh-".len() + 3);
    }

    #[test]
    fn counters_increase_monotonically() {
        let counters = NameCounters::new();
        assert_eq!(counters.next("sh"), "sh-1");
        assert_eq!(counters.next("sh"), "sh-2");
        assert_eq!(counters.next("ca"), "ca-1");
    }

    #[test]
    fn seed_raises_floor_without_lowering() {
        let counters = NameCounters::new();
        counters.seed("sh", 5);
        assert_eq!(counters.next("sh"), "sh-6");
        counters.seed("sh", 2);
        assert_eq!(counters.next("sh"), "sh-7");
    }

    #[test]
    fn trailing_counter_parses() {
        assert_eq!(trailing_counter("sh-12"), Some(12));
        assert_eq!(trailing_counter("no-number-here"), None);
        assert_eq!(trailing_counter("bare"), None);
    }
}
