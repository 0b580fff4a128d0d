//! Environment sanitization for spawned children (§4.A, §6 env contract).
//!
//! Variables that let a TUI detect a *different* host terminal emulator
//! (the corpus's concrete example: `WT_*`, Windows Terminal) conflict with
//! the browser's own emulator and must be stripped before `execve`. `TERM`
//! is then forced to a declared value, and the request's `env` plus any
//! caller-provided `TERM_PROGRAM` override win over everything.

use std::collections::HashMap;

use crate::config::SecurityConfig;

/// Build the environment passed to a spawned child:
/// `(process env - sanitized set) ∪ request env ∪ {TERM, TERM_PROGRAM?}`,
/// with later sets winning.
pub fn build_child_env(
    process_env: impl IntoIterator<Item = (String, String)>,
    request_env: Option<&HashMap<String, String>>,
    security: &SecurityConfig,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = process_env
        .into_iter()
        .filter(|(k, _)| !is_sanitized(k, security))
        .collect();

    if let Some(req) = request_env {
        for (k, v) in req {
            env.insert(k.clone(), v.clone());
        }
    }

    // TERM is forced unless the request explicitly overrode it above.
    env.entry("TERM".to_string())
        .or_insert_with(|| security.default_term.clone());

    env
}

fn is_sanitized(name: &str, security: &SecurityConfig) -> bool {
    security
        .sanitized_env_prefixes
        .iter()
        .any(|p| name.starts_with(p.as_str()))
        || security.sanitized_env_names.iter().any(|n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> SecurityConfig {
        SecurityConfig {
            allowed_ws_origins: vec![],
            sanitized_env_prefixes: vec!["WT_".into()],
            sanitized_env_names: vec!["ITERM_PROFILE".into()],
            default_term: "xterm-256color".into(),
        }
    }

    #[test]
    fn strips_prefixed_and_named_vars() {
        let process_env = [
            ("WT_SESSION".to_string(), "abc".to_string()),
            ("ITERM_PROFILE".to_string(), "Default".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let env = build_child_env(process_env, None, &security());
        assert!(!env.contains_key("WT_SESSION"));
        assert!(!env.contains_key("ITERM_PROFILE"));
        assert_eq!(env.get("PATH"), Some(&"/usr/bin".to_string()));
    }

    #[test]
    fn forces_term_when_absent() {
        let env = build_child_env(std::iter::empty(), None, &security());
        assert_eq!(env.get("TERM"), Some(&"xterm-256color".to_string()));
    }

    #[test]
    fn request_env_overrides_term() {
        let mut req = HashMap::new();
        req.insert("TERM_PROGRAM".to_string(), "custom".to_string());
        req.insert("TERM".to_string(), "xterm".to_string());
        let env = build_child_env(std::iter::empty(), Some(&req), &security());
        assert_eq!(env.get("TERM"), Some(&"xterm".to_string()));
        assert_eq!(env.get("TERM_PROGRAM"), Some(&"custom".to_string()));
    }
}
