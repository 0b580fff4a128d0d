//! Thin wrapper around the host `tmux` binary's non-interactive query/
//! mutation surface. One-shot invocations only; attaching a PTY client to
//! a session is (A)'s job, not this module's.

use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("mux session not found: {0}")]
    NotFound(String),
    #[error("mux command failed: {0}")]
    CommandFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("non-utf8 output from mux command")]
    Utf8,
}

/// Run `<binary> <args>` and return trimmed stdout. Non-zero exit is
/// classified as [`MuxError::NotFound`] when tmux's own message mentions a
/// missing session (its error text is stable across versions enough to
/// grep), else [`MuxError::CommandFailed`].
pub fn run(binary: &str, args: &[&str]) -> Result<String, MuxError> {
    let output = Command::new(binary).args(args).output()?;
    let stdout = String::from_utf8(output.stdout).map_err(|_| MuxError::Utf8)?;
    if !output.status.success() {
        let stderr = String::from_utf8(output.stderr).unwrap_or_default();
        let stderr = stderr.trim();
        if stderr.contains("can't find session") || stderr.contains("session not found") {
            return Err(MuxError::NotFound(stderr.to_string()));
        }
        return Err(MuxError::CommandFailed(stderr.to_string()));
    }
    Ok(stdout.trim_end_matches('\n').to_string())
}

/// Like [`run`] but a nonzero exit is swallowed into `Ok(false)`, for
/// existence probes (`has-session`) where a failure is the expected
/// negative answer, not an error.
pub fn probe(binary: &str, args: &[&str]) -> bool {
    Command::new(binary)
        .args(args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_rejects_unknown_binary() {
        let err = run("definitely-not-a-real-binary-xyz", &["--version"]).unwrap_err();
        assert!(matches!(err, MuxError::Io(_)));
    }

    #[test]
    fn probe_false_for_unknown_binary() {
        assert!(!probe("definitely-not-a-real-binary-xyz", &["--version"]));
    }
}
