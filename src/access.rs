//! Role model and the access gate every dashboard action passes through.

use crate::ipc::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Live identity for the one active connection. Held only in `AppState`,
/// replaced by a new login, dropped on logout. Carries no password material.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub department: Option<String>,
    pub issued_at: String,
}

/// Pure gate: the session must exist and its role must be in `required`.
/// Denial happens before any store access, so a denied action never sees
/// a partial read.
pub fn authorize<'a>(
    session: Option<&'a Session>,
    required: &[Role],
) -> Result<&'a Session, ApiError> {
    let session = session.ok_or(ApiError::AccessDenied)?;
    if required.contains(&session.role) {
        Ok(session)
    } else {
        Err(ApiError::AccessDenied)
    }
}
