//! The Spawn Pipeline (component C): validate, rate-limit, correlate,
//! and atomically publish a new terminal. See §4.C.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use tt_core::config::{MuxConfig, RateLimitConfig};
use tt_core::error::{Result, ServerError};
use tt_core::limits::DEFAULT_PENDING_SPAWN_TTL;
use tt_core::naming::mux_session_name;
use tt_core::types::{SpawnRequest, Terminal, TerminalId, TerminalState};
use tt_mux::MuxIntrospector;
use tt_pty::{PtyHandler, SpawnConfig};
use tt_registry::TerminalRegistry;

use crate::pending::PendingSpawns;
use crate::rate_limit::SpawnRateLimiter;
use crate::validate::{validate, ValidatedSpawn};

pub struct SpawnPipeline {
    pty: Arc<PtyHandler>,
    registry: Arc<TerminalRegistry>,
    mux_introspector: Arc<MuxIntrospector>,
    mux_config: MuxConfig,
    rate_limiter: SpawnRateLimiter,
    pending: Arc<PendingSpawns>,
}

impl SpawnPipeline {
    pub fn new(
        pty: Arc<PtyHandler>,
        registry: Arc<TerminalRegistry>,
        mux_introspector: Arc<MuxIntrospector>,
        mux_config: MuxConfig,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        Self {
            pty,
            registry,
            mux_introspector,
            mux_config,
            rate_limiter: SpawnRateLimiter::new(rate_limit),
            pending: PendingSpawns::new(),
        }
    }

    /// `client_key` namespaces the rate limiter and has no other effect;
    /// either the WebSocket `clientId` or the `requestId` itself, per the
    /// design's latitude on rate-limit scoping.
    pub async fn spawn(&self, request: SpawnRequest, client_key: &str) -> Result<Terminal> {
        let validated = validate(request, &self.mux_config)?;

        if let Err(retry_after) = self.rate_limiter.check(client_key) {
            return Err(ServerError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }

        let request_id = validated.request_id.clone();
        let pty = self.pty.clone();
        let registry = self.registry.clone();
        let mux_introspector = self.mux_introspector.clone();
        let mux_config = self.mux_config.clone();

        self.pending
            .dedup(&request_id, DEFAULT_PENDING_SPAWN_TTL, move || {
                create_and_register(pty, registry, mux_introspector, mux_config, validated)
            })
            .await
    }
}

async fn create_and_register(
    pty: Arc<PtyHandler>,
    registry: Arc<TerminalRegistry>,
    mux_introspector: Arc<MuxIntrospector>,
    mux_config: MuxConfig,
    validated: ValidatedSpawn,
) -> Result<Terminal> {
    let id = TerminalId::new();
    let name = validated
        .name
        .clone()
        .unwrap_or_else(|| registry.generate_name(&validated.type_abbrev));

    let working_dir = validated.working_dir.clone();
    let commands = validated.commands.clone();
    let env = validated.env.clone();
    let use_mux = validated.use_mux;
    let type_abbrev = validated.type_abbrev.clone();
    let cols = validated.cols;
    let rows = validated.rows;

    let spawn_result = tokio::task::spawn_blocking(move || {
        let session_name = if use_mux {
            Some(loop_until_unused_name(&mux_introspector, &mux_config, &type_abbrev))
        } else {
            None
        };
        let session_exists = match &session_name {
            Some(name) => mux_introspector.session_exists(name),
            None => false,
        };

        let outcome = pty.create(
            id,
            SpawnConfig {
                working_dir: &working_dir,
                commands: &commands,
                env: &env,
                use_mux,
                session_name: session_name.as_deref(),
                session_exists,
                cols,
                rows,
            },
        )?;

        if use_mux && outcome.fresh_mux_session {
            if let Some(name) = &session_name {
                let _ = mux_introspector.set_option(name, "terminalType", &validated.terminal_type);
            }
        }

        Ok::<_, ServerError>((outcome, session_name, validated))
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))?;

    let (outcome, session_name, validated) = spawn_result?;

    let terminal = Terminal {
        id,
        agent_id: id,
        name,
        terminal_type: validated.terminal_type,
        commands: validated.commands,
        working_dir: validated.working_dir,
        env: validated.env,
        platform: validated.platform,
        use_mux,
        session_name,
        cols,
        rows,
        state: TerminalState::Spawning,
        created_at: Utc::now(),
        last_activity: Utc::now(),
        request_id: Some(validated.request_id),
        child_pid: outcome.child_pid,
        mux_pid: outcome.mux_pid,
    };

    info!(%id, terminal_type = %terminal.terminal_type, use_mux, "terminal spawned");
    Ok(registry.register(terminal))
}

/// `sessionName` generation is uniqueness-random (§3); collisions against
/// a live external session are astronomically unlikely but checked and
/// retried rather than assumed away.
fn loop_until_unused_name(mux: &MuxIntrospector, mux_config: &MuxConfig, type_abbrev: &str) -> String {
    for _ in 0..8 {
        let candidate = mux_session_name(&mux_config.managed_prefix, type_abbrev);
        if !mux.session_exists(&candidate) {
            return candidate;
        }
    }
    mux_session_name(&mux_config.managed_prefix, type_abbrev)
}
