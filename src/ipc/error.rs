use serde_json::json;
use thiserror::Error;

/// Recoverable action-boundary failures. Every variant maps to a stable
/// wire code; the dashboard renders the message and the process keeps going.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already taken: {0}")]
    DuplicateUsername(String),
    #[error("access denied")]
    AccessDenied,
    #[error("field not writable: {0}")]
    FieldNotWritable(&'static str),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadParams(String),
    #[error("select a workspace first")]
    NoWorkspace,
    #[error("insights unavailable: {0}")]
    ExternalUnavailable(String),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::DuplicateUsername(_) => "duplicate_username",
            ApiError::AccessDenied => "access_denied",
            ApiError::FieldNotWritable(_) => "field_not_writable",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::BadParams(_) => "bad_params",
            ApiError::NoWorkspace => "no_workspace",
            ApiError::ExternalUnavailable(_) => "external_unavailable",
            ApiError::Storage(_) => "storage_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Fold a handler result into the wire envelope.
pub fn respond(id: &str, result: Result<serde_json::Value, ApiError>) -> serde_json::Value {
    match result {
        Ok(value) => ok(id, value),
        Err(e) => err(id, e.code(), e.to_string(), None),
    }
}
