//! Param extraction and row-scope checks shared across handler families.

use rusqlite::{Connection, OptionalExtension};

use crate::access::Role;
use crate::ipc::error::ApiError;
use crate::ipc::types::AppState;

pub fn require_db(state: &AppState) -> Result<&Connection, ApiError> {
    state.db.as_ref().ok_or(ApiError::NoWorkspace)
}

pub fn require_str(params: &serde_json::Value, key: &str) -> Result<String, ApiError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::BadParams(format!("missing {}", key)))
}

pub fn require_i64(params: &serde_json::Value, key: &str) -> Result<i64, ApiError> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ApiError::BadParams(format!("missing {}", key)))
}

pub fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn opt_f64(params: &serde_json::Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

/// Teacher/admin-exclusive columns must never arrive from a student form.
/// The whole action is rejected before any write happens.
pub fn reject_fields(
    params: &serde_json::Value,
    forbidden: &[&'static str],
) -> Result<(), ApiError> {
    for key in forbidden {
        if params.get(*key).is_some() {
            return Err(ApiError::FieldNotWritable(key));
        }
    }
    Ok(())
}

pub fn user_role(conn: &Connection, user_id: i64) -> Result<Option<Role>, ApiError> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ? AND is_active = 1",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(role.as_deref().and_then(Role::parse))
}

/// FK guard for academic records: the owner must exist and hold the role
/// the column demands.
pub fn require_user_with_role(
    conn: &Connection,
    user_id: i64,
    role: Role,
    entity: &'static str,
) -> Result<(), ApiError> {
    match user_role(conn, user_id)? {
        Some(actual) if actual == role => Ok(()),
        Some(_) => Err(ApiError::BadParams(format!(
            "user {} is not a {}",
            user_id,
            role.as_str()
        ))),
        None => Err(ApiError::NotFound(entity)),
    }
}

pub fn subject_exists(conn: &Connection, subject_id: i64) -> Result<bool, ApiError> {
    Ok(conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn subject_taught_by(
    conn: &Connection,
    subject_id: i64,
    teacher_id: i64,
) -> Result<bool, ApiError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND teacher_id = ?",
            (subject_id, teacher_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn student_enrolled(
    conn: &Connection,
    student_id: i64,
    subject_id: i64,
) -> Result<bool, ApiError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE student_id = ? AND subject_id = ? AND status = 'active'",
            (student_id, subject_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}
