//! Composition root for the terminal multiplexer server: wires the six
//! components (A–F) together, runs the boot sequence, and serves HTTP +
//! WebSocket traffic until a signal asks for graceful shutdown. See
//! SPEC_FULL.md §10.G.

mod boot;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use tt_core::config::Config;
use tt_core::types::Event;
use tt_gateway::GatewayState;
use tt_mux::MuxIntrospector;
use tt_pty::PtyHandler;
use tt_registry::TerminalRegistry;
use tt_spawn::SpawnPipeline;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tt-server: fatal error during startup: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = Config::load().context("loading configuration")?;
    tt_telemetry::logging::init(&config.logging.level, config.logging.json);

    info!(
        port = config.server.port,
        bind = %config.server.bind_address,
        "starting tt-server"
    );

    let mux = Arc::new(MuxIntrospector::new(config.mux.clone()));

    let (pty_events_tx, pty_events_rx) = flume::unbounded::<Event>();
    let pty = Arc::new(PtyHandler::new(
        config.mux.clone(),
        config.security.clone(),
        pty_events_tx,
    ));
    let registry = TerminalRegistry::new(pty.clone(), config.mux.clone(), pty_events_rx);

    run_boot_sequence(&config, &mux, &registry);

    let spawn_pipeline = Arc::new(SpawnPipeline::new(
        pty.clone(),
        registry.clone(),
        mux.clone(),
        config.mux.clone(),
        &config.rate_limit,
    ));

    let state = GatewayState::new(
        registry.clone(),
        spawn_pipeline,
        mux.clone(),
        config.security.allowed_ws_origins.clone(),
    );
    let app = tt_gateway::router(state);

    let bind_addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %bind_addr, error = %err, "failed to bind TCP listener");
            return Ok(ExitCode::from(2));
        }
    };
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await
        .context("serving")?;

    info!("no longer accepting connections, draining terminals");
    let drained = shutdown::drain(&registry, SHUTDOWN_DEADLINE).await;
    if drained {
        info!("drained cleanly, exiting");
        Ok(ExitCode::SUCCESS)
    } else {
        info!("shutdown deadline exceeded, forcing exit");
        Ok(ExitCode::FAILURE)
    }
}

/// Runs the ordered boot-time cleanup/recovery passes (§6, §10.G):
/// `FORCE_CLEANUP` takes precedence over `CLEANUP_ON_START`; `RECOVER_TERMINALS`
/// always runs last since it is what populates the registry in the first
/// place. A second `cleanup_duplicates()` pass runs after recovery so that
/// `CLEANUP_ON_START`'s registry-level dedup (which needs recovered entries
/// to have anything to deduplicate) still takes effect within the same boot.
fn run_boot_sequence(config: &Config, mux: &MuxIntrospector, registry: &Arc<TerminalRegistry>) {
    if config.boot.force_cleanup {
        info!("FORCE_CLEANUP set, killing all managed mux sessions");
        boot::force_cleanup(mux);
    } else if config.boot.cleanup_on_start {
        info!("CLEANUP_ON_START set, cleaning up stale mux sessions");
        boot::intelligent_cleanup(mux, &config.mux.managed_prefix, &config.boot.known_problematic_prefixes);
    }

    if config.boot.recover_terminals {
        let n = boot::recover_terminals(mux, registry);
        info!(count = n, "recovered mux sessions as disconnected terminals");
        if config.boot.cleanup_on_start {
            registry.cleanup_duplicates();
        }
    }
}
