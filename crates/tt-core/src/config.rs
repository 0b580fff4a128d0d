use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::limits;

/// Top-level configuration. Loaded by layering, in order: compiled-in
/// defaults, an optional TOML file at `~/.config/tt-server/config.toml`
/// (or `$XDG_CONFIG_HOME`), then the CLI-surface environment variables
/// (`PORT`, `LOG_LEVEL`, `CLEANUP_ON_START`, `FORCE_CLEANUP`,
/// `RECOVER_TERMINALS`), which always win. A config file is never
/// required to boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub boot: BootConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub mux: MuxConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            boot: BootConfig::default(),
            rate_limit: RateLimitConfig::default(),
            mux: MuxConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the default path, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Config::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut cfg: Config =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Environment variables named in the CLI surface always win over
    /// both compiled-in defaults and a config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(v) = std::env::var("CLEANUP_ON_START") {
            self.boot.cleanup_on_start = parse_bool(&v, self.boot.cleanup_on_start);
        }
        if let Ok(v) = std::env::var("FORCE_CLEANUP") {
            self.boot.force_cleanup = parse_bool(&v, self.boot.force_cleanup);
        }
        if let Ok(v) = std::env::var("RECOVER_TERMINALS") {
            self.boot.recover_terminals = parse_bool(&v, self.boot.recover_terminals);
        }
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tt-server").join("config.toml"))
    }
}

fn parse_bool(raw: &str, fallback: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_port() -> u16 {
    limits::DEFAULT_PORT
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    #[serde(default)]
    pub cleanup_on_start: bool,
    #[serde(default)]
    pub force_cleanup: bool,
    #[serde(default = "default_true")]
    pub recover_terminals: bool,
    #[serde(default = "default_problematic_prefixes")]
    pub known_problematic_prefixes: Vec<String>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            cleanup_on_start: false,
            force_cleanup: false,
            recover_terminals: true,
            known_problematic_prefixes: default_problematic_prefixes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_problematic_prefixes() -> Vec<String> {
    vec!["tt-stale-".into(), "tt-orphan-".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_per_window")]
    pub spawns_per_window: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_burst")]
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            spawns_per_window: default_rate_limit_per_window(),
            window_secs: default_rate_limit_window_secs(),
            burst: default_rate_limit_burst(),
        }
    }
}

fn default_rate_limit_per_window() -> u32 {
    limits::DEFAULT_RATE_LIMIT_PER_WINDOW
}
fn default_rate_limit_window_secs() -> u64 {
    limits::DEFAULT_RATE_LIMIT_WINDOW.as_secs()
}
fn default_rate_limit_burst() -> f64 {
    limits::DEFAULT_RATE_LIMIT_BURST
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    #[serde(default = "default_mux_binary")]
    pub binary: String,
    #[serde(default = "default_type_abbrev")]
    pub type_abbrev: HashMap<String, String>,
    #[serde(default = "default_allowed_terminal_types")]
    pub allowed_terminal_types: Vec<String>,
    #[serde(default = "default_managed_prefix")]
    pub managed_prefix: String,
    #[serde(default = "default_disconnect_grace_secs")]
    pub disconnect_grace_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            binary: default_mux_binary(),
            type_abbrev: default_type_abbrev(),
            allowed_terminal_types: default_allowed_terminal_types(),
            managed_prefix: default_managed_prefix(),
            disconnect_grace_secs: default_disconnect_grace_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            resize_debounce_ms: default_resize_debounce_ms(),
        }
    }
}

fn default_mux_binary() -> String {
    "tmux".into()
}

fn default_type_abbrev() -> HashMap<String, String> {
    [
        ("shell", "sh"),
        ("bash", "sh"),
        ("code-agent", "ca"),
        ("claude", "cl"),
        ("codex", "cx"),
        ("gemini", "ge"),
        ("opencode", "oc"),
        ("tui", "tu"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_allowed_terminal_types() -> Vec<String> {
    default_type_abbrev().into_keys().collect()
}

fn default_managed_prefix() -> String {
    limits::MANAGED_SESSION_PREFIX.into()
}

fn default_disconnect_grace_secs() -> u64 {
    limits::DEFAULT_DISCONNECT_GRACE.as_secs()
}

fn default_cleanup_interval_secs() -> u64 {
    limits::HOUSEKEEPING_INTERVAL.as_secs()
}

fn default_resize_debounce_ms() -> u64 {
    limits::RESIZE_DEBOUNCE.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_allowed_ws_origins")]
    pub allowed_ws_origins: Vec<String>,
    #[serde(default = "default_sanitized_env_prefixes")]
    pub sanitized_env_prefixes: Vec<String>,
    #[serde(default)]
    pub sanitized_env_names: Vec<String>,
    #[serde(default = "default_term")]
    pub default_term: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_ws_origins: default_allowed_ws_origins(),
            sanitized_env_prefixes: default_sanitized_env_prefixes(),
            sanitized_env_names: Vec::new(),
            default_term: default_term(),
        }
    }
}

fn default_allowed_ws_origins() -> Vec<String> {
    vec![
        "http://localhost".into(),
        "http://127.0.0.1".into(),
        "https://localhost".into(),
        "https://127.0.0.1".into(),
    ]
}

fn default_sanitized_env_prefixes() -> Vec<String> {
    // WT_ identifies Windows Terminal; its presence flips terminal-type
    // detection in several TUIs away from what the browser emulator needs.
    vec!["WT_".into()]
}

fn default_term() -> String {
    "xterm-256color".into()
}
