use thiserror::Error;

/// Semantic error kind used uniformly by the HTTP surface (status code) and
/// the WebSocket gateway (frame selection) so the mapping table in the
/// design lives in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailed,
    RateLimited,
    NotFound,
    InvalidState,
    SpawnFailed,
    PermissionDenied,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ValidationFailed => 400,
            ErrorKind::RateLimited => 429,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 400,
            ErrorKind::SpawnFailed => 500,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::Internal => 500,
        }
    }

    /// Outbound WS frame `type` used to report an error of this kind.
    pub fn ws_frame(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed | ErrorKind::RateLimited | ErrorKind::SpawnFailed => {
                "spawn-error"
            }
            _ => "error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "ValidationFailed",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::SpawnFailed => "SpawnError",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Internal => "Internal",
        }
    }
}

/// Crate-boundary error type. Internal plumbing errors (I/O, joins, TOML
/// parsing) are collected with `anyhow::Context` at their call site and
/// folded into `Internal` before crossing back into a component's public
/// API — library error types never leak across a module line uncategorized.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            ServerError::RateLimited { .. } => ErrorKind::RateLimited,
            ServerError::NotFound(_) => ErrorKind::NotFound,
            ServerError::InvalidState(_) => ErrorKind::InvalidState,
            ServerError::SpawnFailed(_) => ErrorKind::SpawnFailed,
            ServerError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ServerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        ServerError::Internal(msg.to_string())
    }
}

impl From<SpawnError> for ServerError {
    fn from(e: SpawnError) -> Self {
        ServerError::SpawnFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_documented_http_status() {
        assert_eq!(ErrorKind::ValidationFailed.http_status(), 400);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::InvalidState.http_status(), 400);
        assert_eq!(ErrorKind::SpawnFailed.http_status(), 500);
        assert_eq!(ErrorKind::PermissionDenied.http_status(), 403);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn spawn_errors_route_to_spawn_error_frame() {
        assert_eq!(ErrorKind::ValidationFailed.ws_frame(), "spawn-error");
        assert_eq!(ErrorKind::RateLimited.ws_frame(), "spawn-error");
        assert_eq!(ErrorKind::SpawnFailed.ws_frame(), "spawn-error");
        assert_eq!(ErrorKind::NotFound.ws_frame(), "error");
        assert_eq!(ErrorKind::InvalidState.ws_frame(), "error");
    }

    #[test]
    fn spawn_error_folds_into_server_error_spawn_failed() {
        let spawn_err = SpawnError::ExecNotFound("bash".into());
        let server_err: ServerError = spawn_err.into();
        assert_eq!(server_err.kind(), ErrorKind::SpawnFailed);
        assert!(server_err.to_string().contains("bash"));
    }
}

/// Synchronous failure modes from (A) when allocating a PTY and spawning
/// the child. Always converted to `ServerError::SpawnFailed` at the
/// registry boundary; kept distinct here so call sites can match on the
/// precise cause (e.g. to decide whether retrying makes sense).
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable not found: {0}")]
    ExecNotFound(String),

    #[error("working directory invalid: {0}")]
    WorkingDirInvalid(String),

    #[error("failed to allocate pty: {0}")]
    PtyAllocFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
