//! Boot-time cleanup and recovery passes (§6 CLI surface, §10.G bootstrap
//! ordering). Run once, before the TCP listener is bound, so recovered or
//! killed state is settled before any client can observe it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use tt_core::types::{Platform, Terminal, TerminalId, TerminalState};
use tt_mux::MuxIntrospector;
use tt_registry::TerminalRegistry;

/// `FORCE_CLEANUP`: unconditionally kill every `tt-*` mux session before
/// accepting connections. Runs instead of `CLEANUP_ON_START` when both are
/// set (§6: "on boot, unconditionally kill all owned PTYs" — at boot there
/// are no owned PTYs yet, so the only live state to clear is external mux
/// sessions carrying the reserved prefix).
pub fn force_cleanup(mux: &MuxIntrospector) {
    let sessions = match mux.list_detailed() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "FORCE_CLEANUP: failed to list mux sessions");
            return;
        }
    };
    let groups = mux.group_sessions(sessions);
    for session in groups.managed {
        match mux.kill_session(&session.name) {
            Ok(()) => info!(session = %session.name, "FORCE_CLEANUP: killed mux session"),
            Err(e) => warn!(session = %session.name, error = %e, "FORCE_CLEANUP: kill failed"),
        }
    }
}

/// `CLEANUP_ON_START`: kill managed sessions whose name carries one of the
/// configured known-problematic-launcher prefixes. Registry-level dedup
/// (`cleanup_duplicates`) runs separately, after recovery, since the
/// registry has nothing to deduplicate before `RECOVER_TERMINALS` has run.
pub fn intelligent_cleanup(mux: &MuxIntrospector, managed_prefix: &str, known_problematic_prefixes: &[String]) {
    let sessions = match mux.list_detailed() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "CLEANUP_ON_START: failed to list mux sessions");
            return;
        }
    };
    let groups = mux.group_sessions(sessions);
    for session in groups.managed {
        let stem = session.name.strip_prefix(managed_prefix).unwrap_or(&session.name);
        let matches_known_bad = known_problematic_prefixes
            .iter()
            .any(|p| stem.starts_with(p.as_str()));
        if matches_known_bad {
            match mux.kill_session(&session.name) {
                Ok(()) => info!(session = %session.name, "CLEANUP_ON_START: killed stale session"),
                Err(e) => warn!(session = %session.name, error = %e, "CLEANUP_ON_START: kill failed"),
            }
        }
    }
}

/// `RECOVER_TERMINALS`: enumerate `tt-*` mux sessions and restore each as a
/// `disconnected`, reattachable Terminal. A session's `@tt-terminalType`
/// user-option (stamped by (A) on creation) recovers its launcher class;
/// sessions missing it (created by a prior server version, or externally)
/// fall back to `"shell"`.
pub fn recover_terminals(mux: &MuxIntrospector, registry: &Arc<TerminalRegistry>) -> usize {
    let sessions = match mux.list_detailed() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "RECOVER_TERMINALS: failed to list mux sessions");
            return 0;
        }
    };
    let groups = mux.group_sessions(sessions);
    let mut recovered = 0;
    for session in groups.managed {
        let terminal_type = session.terminal_type.clone().unwrap_or_else(|| "shell".into());
        let working_dir = session.current_path.clone().unwrap_or_else(|| "/".into());
        let created_at = chrono::DateTime::from_timestamp(session.created_at, 0).unwrap_or_else(Utc::now);

        let terminal = Terminal {
            id: TerminalId::new(),
            agent_id: TerminalId::new(),
            name: session.name.clone(),
            terminal_type,
            commands: Vec::new(),
            working_dir,
            env: HashMap::new(),
            platform: Platform::Local,
            use_mux: true,
            session_name: Some(session.name.clone()),
            cols: 80,
            rows: 24,
            state: TerminalState::Spawning, // overwritten by recover_disconnected
            created_at,
            last_activity: Utc::now(),
            request_id: None,
            child_pid: None,
            mux_pid: None,
        };
        let terminal = registry.recover_disconnected(terminal);
        info!(id = %terminal.id, session = %session.name, "recovered mux session as disconnected terminal");
        recovered += 1;
    }
    if recovered > 0 {
        registry.seed_name_counters();
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_core::config::{MuxConfig, SecurityConfig};
    use tt_pty::PtyHandler;

    #[tokio::test]
    async fn recover_terminals_is_a_noop_without_a_mux_server() {
        let (tx, rx) = flume::unbounded();
        let pty = Arc::new(PtyHandler::new(MuxConfig::default(), SecurityConfig::default(), tx));
        let registry = TerminalRegistry::new(pty, MuxConfig::default(), rx);
        let mux = MuxIntrospector::new(MuxConfig {
            binary: "definitely-not-a-real-tmux-binary".into(),
            ..MuxConfig::default()
        });
        let n = recover_terminals(&mux, &registry);
        assert_eq!(n, 0);
        assert!(registry.get_all().is_empty());
    }
}
