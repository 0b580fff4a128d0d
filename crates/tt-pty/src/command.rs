//! Command-vector rules (§4.A): decide what actually gets `execve`'d for a
//! terminal, depending on `use_mux`.

use portable_pty::CommandBuilder;
use std::collections::HashMap;

use tt_core::config::MuxConfig;

/// What the PTY handler should run, and whether it is a fresh mux session
/// (so the caller knows to stamp user-options after the first attach).
pub enum Launch {
    Direct(CommandBuilder),
    MuxAttach(CommandBuilder),
    MuxCreate(CommandBuilder),
}

impl Launch {
    pub fn into_command(self) -> CommandBuilder {
        match self {
            Launch::Direct(c) | Launch::MuxAttach(c) | Launch::MuxCreate(c) => c,
        }
    }

    pub fn is_fresh_mux_session(&self) -> bool {
        matches!(self, Launch::MuxCreate(_))
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// `useMux=false`: run the request's command(s) under a login shell
/// wrapper, or the platform default shell with no command.
pub fn direct_launch(commands: &[String]) -> Launch {
    let shell = default_shell();
    let mut cmd = CommandBuilder::new(&shell);
    cmd.arg("-l");
    if !commands.is_empty() {
        cmd.arg("-c");
        cmd.arg(commands.join(" && "));
    }
    Launch::Direct(cmd)
}

/// `useMux=true`: attach to `session_name` if it already exists on the mux
/// server, else create it with the request's command as its initial
/// window. `session_exists` is injected so callers can use a real
/// `tmux has-session` probe without this module depending on (D).
pub fn mux_launch(
    mux: &MuxConfig,
    session_name: &str,
    working_dir: &str,
    commands: &[String],
    session_exists: bool,
) -> Launch {
    let mut cmd = CommandBuilder::new(&mux.binary);
    if session_exists {
        cmd.arg("attach-session");
        cmd.arg("-t");
        cmd.arg(session_name);
        Launch::MuxAttach(cmd)
    } else {
        cmd.arg("new-session");
        cmd.arg("-A"); // attach-or-create: idempotent under a race with another spawn
        cmd.arg("-s");
        cmd.arg(session_name);
        cmd.arg("-c");
        cmd.arg(working_dir);
        if !commands.is_empty() {
            cmd.arg(commands.join(" && "));
        }
        Launch::MuxCreate(cmd)
    }
}

/// Apply the request's environment on top of `base_env` onto a
/// [`CommandBuilder`].
pub fn apply_env(cmd: &mut CommandBuilder, env: &HashMap<String, String>) {
    for (k, v) in env {
        cmd.env(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_launch_wraps_in_login_shell() {
        let launch = direct_launch(&["echo hi".to_string()]);
        assert!(matches!(launch, Launch::Direct(_)));
        assert!(!launch.is_fresh_mux_session());
    }

    #[test]
    fn mux_launch_attaches_when_session_exists() {
        let mux = MuxConfig::default();
        let launch = mux_launch(&mux, "tt-sh-abc", "/tmp", &[], true);
        assert!(matches!(launch, Launch::MuxAttach(_)));
        assert!(!launch.is_fresh_mux_session());
    }

    #[test]
    fn mux_launch_creates_when_session_absent() {
        let mux = MuxConfig::default();
        let launch = mux_launch(&mux, "tt-sh-abc", "/tmp", &["echo hi".into()], false);
        assert!(matches!(launch, Launch::MuxCreate(_)));
        assert!(launch.is_fresh_mux_session());
    }
}
