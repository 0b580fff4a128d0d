//! The WebSocket gateway's single control-plane endpoint (§4.E).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use tt_core::types::Terminal;

use crate::origin;
use crate::protocol::{Inbound, Outbound};
use crate::session::ClientSession;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Opaque client-supplied tag identifying which browser window this
    /// connection represents; the server never partitions state on it.
    window_tag: Option<String>,
}

pub async fn upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(status) = origin::validate(&headers, &state.allowed_origins) {
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.window_tag))
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, window_tag: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let session = Arc::new(ClientSession::new(outbound_tx, window_tag));
    let client_id = session.id;
    state.sessions.insert(client_id, session.clone());
    info!(%client_id, "gateway client connected");

    let snapshot: Vec<Terminal> = state.registry.get_all();
    session.send(Message::Text(Outbound::Terminals { terminals: snapshot }.to_text().into()));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_tx = session.outbound.clone();
    let heartbeat = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            if heartbeat_tx.send(Message::Ping(Vec::new().into())).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                if !handle_inbound_text(&state, &session, client_id, &text).await {
                    break;
                }
            }
            Message::Binary(_) => {
                if session.record_malformed() {
                    session.send(Message::Text(
                        Outbound::Error { message: "binary frames are not supported".into() }.to_text().into(),
                    ));
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    writer.abort();
    heartbeat.abort();
    disconnect(&state, &session, client_id).await;
    info!(%client_id, "gateway client disconnected");
}

/// Returns `false` when the connection must be torn down (malformed-frame
/// allowance exceeded, or a syntactically invalid JSON frame — a
/// well-behaved client never sends one, so the first offense ends it).
async fn handle_inbound_text(
    state: &Arc<GatewayState>,
    session: &Arc<ClientSession>,
    client_id: uuid::Uuid,
    text: &str,
) -> bool {
    if serde_json::from_str::<serde_json::Value>(text).is_err() {
        session.send(Message::Text(Outbound::Error { message: "invalid JSON".into() }.to_text().into()));
        return false;
    }

    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            debug!(%client_id, error = %e, "out-of-schema gateway frame");
            session.send(Message::Text(
                Outbound::Error { message: format!("unrecognized message: {e}") }.to_text().into(),
            ));
            return !session.record_malformed();
        }
    };

    dispatch_inbound(state, session, client_id, inbound).await;
    true
}

async fn dispatch_inbound(
    state: &Arc<GatewayState>,
    session: &Arc<ClientSession>,
    client_id: uuid::Uuid,
    inbound: Inbound,
) {
    match inbound {
        Inbound::Spawn { config, request_id } => {
            match state.spawn_pipeline.spawn(config, &client_id.to_string()).await {
                Ok(terminal) => {
                    state.ownership.add(terminal.id, client_id);
                    session.own(terminal.id);
                    session.send(Message::Text(
                        Outbound::TerminalSpawned { terminal, request_id }.to_text().into(),
                    ));
                }
                Err(e) => {
                    session.send(Message::Text(
                        Outbound::SpawnError { error: e.to_string(), code: e.kind().code(), request_id }
                            .to_text()
                            .into(),
                    ));
                }
            }
        }
        Inbound::Command { terminal_id, command } => {
            if let Err(e) = state.registry.send_command(terminal_id, command.into_bytes()) {
                session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
            }
        }
        Inbound::Resize { terminal_id, cols, rows } => {
            if let Err(e) = state.registry.resize(terminal_id, cols, rows) {
                session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
            }
        }
        Inbound::Detach { terminal_id } => {
            if let Err(e) = state.registry.close(terminal_id, false) {
                session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
            } else {
                state.ownership.remove(terminal_id, client_id);
                session.disown(terminal_id);
            }
        }
        Inbound::Close { terminal_id } => {
            if let Err(e) = state.registry.close(terminal_id, true) {
                session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
            } else {
                state.ownership.remove(terminal_id, client_id);
                session.disown(terminal_id);
            }
        }
        Inbound::Reconnect { terminal_id } => {
            state.registry.cancel_disconnect(terminal_id);
            match state.registry.reconnect(terminal_id).await {
                Ok((terminal, replay)) => {
                    state.ownership.add(terminal_id, client_id);
                    session.own(terminal_id);
                    session.send(Message::Text(
                        Outbound::TerminalReconnected {
                            terminal,
                            replay: String::from_utf8_lossy(&replay).into_owned(),
                        }
                        .to_text()
                        .into(),
                    ));
                }
                Err(e) => {
                    session.send(Message::Text(
                        Outbound::ReconnectFailed { terminal_id, error: e.to_string() }.to_text().into(),
                    ));
                }
            }
        }
        Inbound::QueryMuxSessions => {
            let mux = state.mux.clone();
            let result = tokio::task::spawn_blocking(move || mux.list_detailed().map(|s| mux.group_sessions(s)))
                .await;
            match result {
                Ok(Ok(sessions)) => {
                    session.send(Message::Text(Outbound::MuxSessionsList { sessions }.to_text().into()));
                }
                Ok(Err(e)) => {
                    session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
                }
                Err(e) => {
                    session.send(Message::Text(Outbound::Error { message: e.to_string() }.to_text().into()));
                }
            }
        }
    }
}

async fn disconnect(state: &GatewayState, session: &ClientSession, client_id: uuid::Uuid) {
    state.sessions.remove(&client_id);
    for terminal_id in session.take_owned() {
        state.ownership.remove(terminal_id, client_id);
        let _ = state.registry.disconnect(terminal_id);
    }
}

#[cfg(test)]
mod tests {
    use tt_core::types::SpawnRequest;

    use crate::test_support::test_state;

    use super::*;

    fn fake_session() -> (Arc<ClientSession>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ClientSession::new(tx, None)), rx)
    }

    fn shell_request(request_id: Option<&str>) -> SpawnRequest {
        SpawnRequest {
            terminal_type: "shell".into(),
            name: None,
            working_dir: Some("/tmp".into()),
            env: None,
            commands: None,
            platform: None,
            use_mux: None,
            cols: None,
            rows: None,
            request_id: request_id.map(String::from),
        }
    }

    fn recv_outbound(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        match rx.try_recv().expect("expected an outbound frame") {
            Message::Text(text) => serde_json::from_str(&text).expect("outbound frame is valid json"),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// S1: a spawn request produces a `terminal_spawned` frame and the
    /// client becomes the terminal's owner.
    #[tokio::test]
    async fn spawn_succeeds_and_owns_the_terminal() {
        let state = test_state();
        let (session, mut rx) = fake_session();
        let client_id = session.id;

        dispatch_inbound(
            &state,
            &session,
            client_id,
            Inbound::Spawn { config: shell_request(None), request_id: None },
        )
        .await;

        let frame = recv_outbound(&mut rx);
        assert_eq!(frame["type"], "terminal_spawned");
        let terminal_id: tt_core::TerminalId =
            frame["terminal"]["id"].as_str().unwrap().parse().unwrap();
        assert_eq!(state.ownership.owners_of(terminal_id), vec![client_id]);
        assert!(session.owned_terminals.lock().unwrap().contains(&terminal_id));
    }

    /// S4: two spawns sharing a `request_id` dedup to the same terminal.
    #[tokio::test]
    async fn duplicate_request_id_dedups_spawn() {
        let state = test_state();
        let (session, mut rx) = fake_session();
        let client_id = session.id;

        dispatch_inbound(
            &state,
            &session,
            client_id,
            Inbound::Spawn { config: shell_request(Some("dup-1")), request_id: None },
        )
        .await;
        let first = recv_outbound(&mut rx);

        dispatch_inbound(
            &state,
            &session,
            client_id,
            Inbound::Spawn { config: shell_request(Some("dup-1")), request_id: None },
        )
        .await;
        let second = recv_outbound(&mut rx);

        assert_eq!(first["terminal"]["id"], second["terminal"]["id"]);
    }

    /// A command against an id that was never spawned reports an error
    /// frame instead of panicking or silently dropping the request.
    #[tokio::test]
    async fn command_to_unknown_terminal_reports_error() {
        let state = test_state();
        let (session, mut rx) = fake_session();
        let client_id = session.id;

        dispatch_inbound(
            &state,
            &session,
            client_id,
            Inbound::Command { terminal_id: tt_core::TerminalId::new(), command: "ls\n".into() },
        )
        .await;

        let frame = recv_outbound(&mut rx);
        assert_eq!(frame["type"], "error");
    }
}
