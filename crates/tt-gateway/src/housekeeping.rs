//! Periodic sweep and `memory-stats` broadcast (§4.E, every 5 s).

use std::sync::Arc;

use axum::extract::ws::Message;
use tt_core::limits::HOUSEKEEPING_INTERVAL;

use crate::protocol::Outbound;
use crate::state::GatewayState;

pub fn spawn_housekeeping(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            sweep_dead_sessions(&state);
            broadcast_memory_stats(&state);
        }
    });
}

/// Backstop for connections whose reader/writer tasks ended without
/// running the normal disconnect path (e.g. a panic in a handler task).
fn sweep_dead_sessions(state: &GatewayState) {
    let dead: Vec<uuid::Uuid> = state
        .sessions
        .iter()
        .filter(|entry| entry.value().outbound.is_closed())
        .map(|entry| *entry.key())
        .collect();

    for client_id in dead {
        if let Some((_, session)) = state.sessions.remove(&client_id) {
            for terminal_id in session.take_owned() {
                state.ownership.remove(terminal_id, client_id);
                let _ = state.registry.disconnect(terminal_id);
            }
        }
    }
}

fn broadcast_memory_stats(state: &GatewayState) {
    let frame = Outbound::MemoryStats {
        memory: tt_telemetry::memory::sample(),
        terminal_count: state.registry.get_all().len(),
        session_count: state.sessions.len(),
    };
    let text = frame.to_text();
    for entry in state.sessions.iter() {
        entry.value().send(Message::Text(text.clone().into()));
    }
}
