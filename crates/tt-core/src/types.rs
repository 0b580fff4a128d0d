use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, process-unique identity for a [`Terminal`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(pub Uuid);

impl TerminalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TerminalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TerminalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Local,
    Docker,
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Local
    }
}

/// Terminal lifecycle state. See the state machine in the design notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalState {
    Spawning,
    Active,
    Disconnected {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        since: DateTime<Utc>,
    },
    Closed,
    Error {
        detail: String,
    },
}

impl TerminalState {
    pub fn label(&self) -> &'static str {
        match self {
            TerminalState::Spawning => "spawning",
            TerminalState::Active => "active",
            TerminalState::Disconnected { .. } => "disconnected",
            TerminalState::Closed => "closed",
            TerminalState::Error { .. } => "error",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            TerminalState::Spawning | TerminalState::Active | TerminalState::Disconnected { .. }
        )
    }
}

/// The registry's authoritative record for one terminal. `agent_id` is kept
/// distinct from `id` in the type only to mirror a legacy two-tier identity
/// some corpora carry; here the two are always equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    pub id: TerminalId,
    pub agent_id: TerminalId,
    pub name: String,
    pub terminal_type: String,
    pub commands: Vec<String>,
    pub working_dir: String,
    pub env: HashMap<String, String>,
    pub platform: Platform,
    pub use_mux: bool,
    pub session_name: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub state: TerminalState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub request_id: Option<String>,
    pub child_pid: Option<u32>,
    pub mux_pid: Option<u32>,
}

impl Terminal {
    pub fn is_active(&self) -> bool {
        matches!(self.state, TerminalState::Active)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Raw, untrusted spawn request as received over the wire. Validation
/// (§3 constraints) happens in the spawn pipeline and produces a
/// [`Terminal`] via the registry; this type never skips that step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub terminal_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub use_mux: Option<bool>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Reason a terminal transitioned to `closed`, carried on the `Closed`
/// event so subscribers can tell a clean exit from a forced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    Exited { code: Option<i32> },
    Io,
    ForceKilled,
    Detached,
}

/// Internal publish/subscribe event emitted by the registry.
#[derive(Debug, Clone)]
pub enum Event {
    Output { id: TerminalId, bytes: Vec<u8> },
    Spawned { id: TerminalId },
    Closed { id: TerminalId, reason: CloseReason },
    Error { id: TerminalId, detail: String },
}

impl Event {
    pub fn terminal_id(&self) -> TerminalId {
        match self {
            Event::Output { id, .. }
            | Event::Spawned { id }
            | Event::Closed { id, .. }
            | Event::Error { id, .. } => *id,
        }
    }
}
