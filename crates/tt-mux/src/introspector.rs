//! Mux Session Introspector (component D): enumerate, classify, and
//! query external `tmux` sessions without attaching a PTY. See §4.D.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use tt_core::config::MuxConfig;

pub use crate::tmux_cli::MuxError;
use crate::tmux_cli::{probe, run};

/// Field delimiter for `tmux -F` format strings: a control character that
/// never appears in session names, paths, or command lines in practice.
const FIELD_SEP: &str = "\x1f";

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
    pub created_at: i64,
    pub current_path: Option<String>,
    pub git_branch: Option<String>,
    pub foreground_command: Option<String>,
    pub terminal_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionGroups {
    pub managed: Vec<SessionInfo>,
    pub by_ai_tool: HashMap<String, Vec<SessionInfo>>,
    pub external: Vec<SessionInfo>,
}

pub struct MuxIntrospector {
    mux: MuxConfig,
}

impl MuxIntrospector {
    pub fn new(mux: MuxConfig) -> Self {
        Self { mux }
    }

    pub fn session_exists(&self, name: &str) -> bool {
        probe(&self.mux.binary, &["has-session", "-t", name])
    }

    /// Enumerate every session on the host with per-session metadata. A
    /// session disappearing between `list-sessions` and its per-session
    /// detail query is tolerated (treated as already gone, simply omitted)
    /// rather than failing the whole call.
    pub fn list_detailed(&self) -> Result<Vec<SessionInfo>, MuxError> {
        let format = format!("#{{session_name}}{FIELD_SEP}#{{session_windows}}{FIELD_SEP}#{{session_attached}}{FIELD_SEP}#{{session_created}}");
        let raw = match run(&self.mux.binary, &["list-sessions", "-F", &format]) {
            Ok(out) => out,
            Err(MuxError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut sessions = Vec::new();
        for line in raw.lines().filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            let [name, windows, attached, created] = fields[..] else {
                warn!(line, "unparseable tmux list-sessions line");
                continue;
            };
            let (current_path, foreground_command) = self.active_pane_context(name);
            let git_branch = current_path.as_deref().and_then(git_branch_of);
            let terminal_type = self.get_option(name, "terminalType");

            sessions.push(SessionInfo {
                name: name.to_string(),
                windows: windows.parse().unwrap_or(0),
                attached: attached.trim() == "1",
                created_at: created.parse().unwrap_or(0),
                current_path,
                git_branch,
                foreground_command,
                terminal_type,
            });
        }
        Ok(sessions)
    }

    fn active_pane_context(&self, session: &str) -> (Option<String>, Option<String>) {
        let format = format!("#{{pane_current_path}}{FIELD_SEP}#{{pane_current_command}}");
        match run(&self.mux.binary, &["display-message", "-p", "-t", session, "-F", &format]) {
            Ok(out) => {
                let mut parts = out.splitn(2, FIELD_SEP);
                let path = parts.next().filter(|s| !s.is_empty()).map(ToOwned::to_owned);
                let cmd = parts.next().filter(|s| !s.is_empty()).map(ToOwned::to_owned);
                (path, cmd)
            }
            Err(_) => (None, None),
        }
    }

    /// Read a `@tt-*` user-option previously stamped by (A) on session
    /// creation (see §6, "Mux session naming and metadata").
    pub fn get_option(&self, session: &str, key: &str) -> Option<String> {
        let option = format!("@tt-{key}");
        run(&self.mux.binary, &["show-options", "-t", session, "-v", &option])
            .ok()
            .filter(|v| !v.is_empty())
    }

    pub fn set_option(&self, session: &str, key: &str, value: &str) -> Result<(), MuxError> {
        let option = format!("@tt-{key}");
        run(&self.mux.binary, &["set-option", "-t", session, &option, value]).map(|_| ())
    }

    /// Classify sessions into `managed` (name carries the reserved
    /// prefix), further grouped by `terminalType` user-option, vs
    /// `external` (created outside this server).
    pub fn group_sessions(&self, sessions: Vec<SessionInfo>) -> SessionGroups {
        let mut groups = SessionGroups::default();
        for session in sessions {
            if session.name.starts_with(&self.mux.managed_prefix) {
                let key = session
                    .terminal_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                groups
                    .by_ai_tool
                    .entry(key)
                    .or_default()
                    .push(session.clone());
                groups.managed.push(session);
            } else {
                groups.external.push(session);
            }
        }
        groups
    }

    pub fn capture_preview(&self, name: &str, lines: u32, window_index: u32) -> Result<String, MuxError> {
        let target = format!("{name}:{window_index}");
        let start = format!("-{lines}");
        run(&self.mux.binary, &["capture-pane", "-p", "-t", &target, "-S", &start])
    }

    pub fn capture_full_scrollback(&self, name: &str, window_index: u32) -> Result<String, MuxError> {
        let target = format!("{name}:{window_index}");
        run(&self.mux.binary, &["capture-pane", "-p", "-t", &target, "-S", "-"])
    }

    /// Inject literal text followed by Enter, as a discrete write
    /// distinct from attaching a client (§4.D).
    pub fn send_keys(&self, name: &str, text: &str) -> Result<(), MuxError> {
        run(&self.mux.binary, &["send-keys", "-t", name, "-l", text])?;
        run(&self.mux.binary, &["send-keys", "-t", name, "Enter"])?;
        Ok(())
    }

    pub fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        run(&self.mux.binary, &["kill-session", "-t", name]).map(|_| ())
    }
}

fn git_branch_of(dir: &str) -> Option<String> {
    let out = std::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
