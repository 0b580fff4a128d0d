//! Fans registry events out to owning client sessions (§4.E output
//! routing). One task, spawned once per [`GatewayState`], subscribes to
//! the registry's broadcast bus for the lifetime of the server.

use std::sync::Arc;

use axum::extract::ws::Message;
use tracing::warn;
use tt_core::types::Event;

use crate::protocol::Outbound;
use crate::state::GatewayState;

pub fn spawn_event_dispatcher(state: Arc<GatewayState>) {
    let mut events = state.registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle_event(&state, event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "gateway event dispatcher fell behind the registry bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn handle_event(state: &GatewayState, event: Event) {
    match event {
        Event::Output { id, bytes } => {
            let owners = state.ownership.owners_of(id);
            if owners.is_empty() {
                return;
            }
            let frame = Outbound::TerminalOutput {
                terminal_id: id,
                data: String::from_utf8_lossy(&bytes).into_owned(),
            };
            send_to(state, &owners, &frame);
        }
        Event::Spawned { id } => {
            let Some(terminal) = state.registry.get(id) else { return };
            let frame = Outbound::TerminalSpawned { terminal, request_id: None };
            broadcast(state, &frame);
        }
        Event::Closed { id, .. } => {
            let frame = Outbound::TerminalClosed { id };
            broadcast(state, &frame);
            state.ownership.remove_terminal(id);
        }
        Event::Error { id, detail } => {
            let owners = state.ownership.owners_of(id);
            if owners.is_empty() {
                return;
            }
            let frame = Outbound::Error { message: detail };
            send_to(state, &owners, &frame);
        }
    }
}

fn send_to(state: &GatewayState, client_ids: &[uuid::Uuid], frame: &Outbound) {
    let text = frame.to_text();
    for client_id in client_ids {
        if let Some(session) = state.sessions.get(client_id) {
            session.send(Message::Text(text.clone().into()));
        }
    }
}

fn broadcast(state: &GatewayState, frame: &Outbound) {
    let text = frame.to_text();
    for entry in state.sessions.iter() {
        entry.value().send(Message::Text(text.clone().into()));
    }
}
