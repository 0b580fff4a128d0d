//! `ClientSession` (§3): per-connection state tracked by the gateway.

use std::collections::HashSet;
use std::sync::Mutex;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use std::time::Instant;

use tokio::sync::mpsc;
use tt_core::limits::{MALFORMED_THRESHOLD, MALFORMED_WINDOW};
use tt_core::TerminalId;
use uuid::Uuid;

/// A 60-second sliding window admits up to [`MALFORMED_THRESHOLD`] bad
/// frames before the connection is terminated; the window resets once it
/// elapses rather than tracking every timestamp.
struct MalformedCounter {
    count: u32,
    window_start: Instant,
}

impl MalformedCounter {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Returns `true` if the session should be terminated.
    fn bump(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) > MALFORMED_WINDOW {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count > MALFORMED_THRESHOLD
    }
}

pub struct ClientSession {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub window_tag: Option<String>,
    pub owned_terminals: Mutex<HashSet<TerminalId>>,
    pub outbound: mpsc::UnboundedSender<Message>,
    malformed: Mutex<MalformedCounter>,
}

impl ClientSession {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, window_tag: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            window_tag,
            owned_terminals: Mutex::new(HashSet::new()),
            outbound,
            malformed: Mutex::new(MalformedCounter::new()),
        }
    }

    pub fn send(&self, message: Message) {
        let _ = self.outbound.send(message);
    }

    /// Record a malformed/out-of-schema inbound frame. Returns `true` if
    /// the connection has now exceeded the allowance and must be closed.
    pub fn record_malformed(&self) -> bool {
        self.malformed.lock().unwrap_or_else(|e| e.into_inner()).bump()
    }

    pub fn own(&self, id: TerminalId) {
        self.owned_terminals.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
    }

    pub fn disown(&self, id: TerminalId) {
        self.owned_terminals.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn take_owned(&self) -> HashSet<TerminalId> {
        std::mem::take(&mut self.owned_terminals.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_counter_trips_after_threshold() {
        let mut counter = MalformedCounter::new();
        let mut tripped = false;
        for _ in 0..(MALFORMED_THRESHOLD + 1) {
            tripped = counter.bump();
        }
        assert!(tripped);
    }

    #[test]
    fn malformed_counter_under_threshold_does_not_trip() {
        let mut counter = MalformedCounter::new();
        for _ in 0..MALFORMED_THRESHOLD {
            assert!(!counter.bump());
        }
    }
}
