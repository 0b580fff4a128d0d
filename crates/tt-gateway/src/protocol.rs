//! The WebSocket gateway's wire protocol (§4.E). JSON text frames only;
//! field names stay `snake_case` to match the rest of this codebase's
//! wire types (`Terminal`, `SpawnRequest`) rather than the prose's
//! `camelCase` spelling — see DESIGN.md.

use serde::{Deserialize, Serialize};
use tt_core::types::{SpawnRequest, Terminal};
use tt_core::TerminalId;
use tt_mux::SessionGroups;
use tt_telemetry::memory::MemorySample;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Spawn {
        config: SpawnRequest,
        #[serde(default)]
        request_id: Option<String>,
    },
    Command {
        terminal_id: TerminalId,
        command: String,
    },
    Resize {
        terminal_id: TerminalId,
        cols: u16,
        rows: u16,
    },
    Detach {
        terminal_id: TerminalId,
    },
    Close {
        terminal_id: TerminalId,
    },
    Reconnect {
        terminal_id: TerminalId,
    },
    QueryMuxSessions,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Terminals {
        terminals: Vec<Terminal>,
    },
    TerminalOutput {
        terminal_id: TerminalId,
        data: String,
    },
    TerminalSpawned {
        terminal: Terminal,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    TerminalClosed {
        id: TerminalId,
    },
    SpawnError {
        error: String,
        code: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    TerminalReconnected {
        terminal: Terminal,
        replay: String,
    },
    ReconnectFailed {
        terminal_id: TerminalId,
        error: String,
    },
    MuxSessionsList {
        sessions: SessionGroups,
    },
    MemoryStats {
        #[serde(flatten)]
        memory: MemorySample,
        terminal_count: usize,
        session_count: usize,
    },
    Error {
        message: String,
    },
}

impl Outbound {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","message":"encode failure"}"#.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_frame_parses_with_optional_request_id() {
        let raw = r#"{"type":"spawn","config":{"terminal_type":"shell"}}"#;
        let parsed: Inbound = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, Inbound::Spawn { request_id: None, .. }));
    }

    #[test]
    fn query_mux_sessions_is_a_unit_variant() {
        let raw = r#"{"type":"query_mux_sessions"}"#;
        let parsed: Inbound = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, Inbound::QueryMuxSessions));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"not-a-real-type"}"#;
        assert!(serde_json::from_str::<Inbound>(raw).is_err());
    }
}
