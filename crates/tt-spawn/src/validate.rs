//! Spawn request validation (§3 `SpawnRequest` constraints, §4.C).

use tt_core::config::MuxConfig;
use tt_core::error::{Result, ServerError};
use tt_core::limits::{COLS_RANGE, COMMAND_MAX_LEN, NAME_MAX_LEN, ROWS_RANGE};
use tt_core::types::{Platform, SpawnRequest};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

pub struct ValidatedSpawn {
    pub terminal_type: String,
    pub type_abbrev: String,
    pub name: Option<String>,
    pub working_dir: String,
    pub env: std::collections::HashMap<String, String>,
    pub commands: Vec<String>,
    pub platform: Platform,
    pub use_mux: bool,
    pub cols: u16,
    pub rows: u16,
    pub request_id: String,
}

pub fn validate(request: SpawnRequest, mux: &MuxConfig) -> Result<ValidatedSpawn> {
    if !mux.allowed_terminal_types.contains(&request.terminal_type) {
        return Err(ServerError::ValidationFailed(format!(
            "unknown terminalType: {}",
            request.terminal_type
        )));
    }
    let type_abbrev = mux
        .type_abbrev
        .get(&request.terminal_type)
        .cloned()
        .unwrap_or_else(|| request.terminal_type.chars().take(2).collect());

    if let Some(name) = &request.name {
        if name.is_empty() || name.len() > NAME_MAX_LEN {
            return Err(ServerError::ValidationFailed(format!(
                "name must be 1..={NAME_MAX_LEN} chars"
            )));
        }
    }

    let cols = request.cols.unwrap_or(DEFAULT_COLS);
    if !COLS_RANGE.contains(&cols) {
        return Err(ServerError::ValidationFailed(format!(
            "cols out of range {COLS_RANGE:?}"
        )));
    }
    let rows = request.rows.unwrap_or(DEFAULT_ROWS);
    if !ROWS_RANGE.contains(&rows) {
        return Err(ServerError::ValidationFailed(format!(
            "rows out of range {ROWS_RANGE:?}"
        )));
    }

    let commands = request.commands.unwrap_or_default();
    for c in &commands {
        if c.len() > COMMAND_MAX_LEN {
            return Err(ServerError::ValidationFailed(format!(
                "command exceeds {COMMAND_MAX_LEN} chars"
            )));
        }
    }

    let working_dir = match request.working_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string()),
    };
    if !std::path::Path::new(&working_dir).is_dir() {
        return Err(ServerError::ValidationFailed(format!(
            "workingDir does not exist: {working_dir}"
        )));
    }

    let request_id = request
        .request_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(ValidatedSpawn {
        terminal_type: request.terminal_type,
        type_abbrev,
        name: request.name,
        working_dir,
        env: request.env.unwrap_or_default(),
        commands,
        platform: request.platform.unwrap_or(Platform::Local),
        use_mux: request.use_mux.unwrap_or(false),
        cols,
        rows,
        request_id,
    })
}
