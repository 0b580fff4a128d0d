//! Shared test scaffolding for `http.rs`, `ws.rs`, `dispatch.rs`, and
//! `router.rs`: builds a real [`GatewayState`]/[`axum::Router`] the same
//! way `tt-server`'s composition root does, minus the bound TCP listener,
//! so handler tests can drive the router directly with
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use tt_core::config::{MuxConfig, RateLimitConfig, SecurityConfig};
use tt_mux::MuxIntrospector;
use tt_pty::PtyHandler;
use tt_registry::TerminalRegistry;
use tt_spawn::SpawnPipeline;

use crate::state::GatewayState;

pub fn test_state() -> Arc<GatewayState> {
    let (tx, rx) = flume::unbounded();
    let mux_config = MuxConfig::default();
    let pty = Arc::new(PtyHandler::new(mux_config.clone(), SecurityConfig::default(), tx));
    let registry = TerminalRegistry::new(pty.clone(), mux_config.clone(), rx);
    let mux = Arc::new(MuxIntrospector::new(mux_config.clone()));
    let spawn_pipeline = Arc::new(SpawnPipeline::new(
        pty,
        registry.clone(),
        mux.clone(),
        mux_config,
        &RateLimitConfig::default(),
    ));
    GatewayState::new(registry, spawn_pipeline, mux, vec!["http://localhost".into()])
}

pub fn test_app() -> axum::Router {
    crate::router::router(test_state())
}
