//! Shared application state for the WebSocket gateway and HTTP surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tt_mux::MuxIntrospector;
use tt_registry::TerminalRegistry;
use tt_spawn::SpawnPipeline;
use uuid::Uuid;

use crate::dispatch;
use crate::housekeeping;
use crate::ownership::OwnershipTable;
use crate::session::ClientSession;

pub struct GatewayState {
    pub registry: Arc<TerminalRegistry>,
    pub spawn_pipeline: Arc<SpawnPipeline>,
    pub mux: Arc<MuxIntrospector>,
    pub ownership: OwnershipTable,
    pub sessions: DashMap<Uuid, Arc<ClientSession>>,
    pub allowed_origins: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    /// Wires the registry's event bus into the per-session output-fanout
    /// task and starts the 5 s housekeeping sweep. Mirrors the registry's
    /// own `new()` spawning its event loop at construction.
    pub fn new(
        registry: Arc<TerminalRegistry>,
        spawn_pipeline: Arc<SpawnPipeline>,
        mux: Arc<MuxIntrospector>,
        allowed_origins: Vec<String>,
    ) -> Arc<Self> {
        let state = Arc::new(Self {
            registry,
            spawn_pipeline,
            mux,
            ownership: OwnershipTable::new(),
            sessions: DashMap::new(),
            allowed_origins,
            started_at: Utc::now(),
        });
        dispatch::spawn_event_dispatcher(state.clone());
        housekeeping::spawn_housekeeping(state.clone());
        state
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
