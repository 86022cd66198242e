use serde_json::json;

use crate::access::{authorize, Role, Session};
use crate::credentials;
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{opt_i64, require_db, require_str};
use crate::ipc::types::{AppState, Request};

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "userId": session.user_id,
        "username": session.username,
        "role": session.role.as_str(),
        "fullName": session.full_name,
        "department": session.department,
        "issuedAt": session.issued_at,
    })
}

fn login(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let username = require_str(params, "username")?;
    let password = require_str(params, "password")?;

    let verified = {
        let conn = require_db(state)?;
        credentials::verify_credentials(conn, &username, &password)
    };
    let user = match verified {
        Ok(user) => user,
        Err(e) => {
            // Failed attempts are logged without any credential material.
            tracing::info!(username = %username, "login rejected");
            return Err(e);
        }
    };

    let session = Session {
        user_id: user.id,
        username: user.username,
        role: user.role,
        full_name: user.full_name,
        department: user.department,
        issued_at: chrono::Utc::now().to_rfc3339(),
    };
    tracing::info!(username = %session.username, role = session.role.as_str(), "login");
    let body = json!({ "session": session_json(&session) });
    // A successful login replaces whatever session the connection had.
    state.session = Some(session);
    Ok(body)
}

fn logout(state: &mut AppState) -> Result<serde_json::Value, ApiError> {
    if let Some(session) = state.session.take() {
        tracing::info!(username = %session.username, "logout");
    }
    Ok(json!({ "ok": true }))
}

fn current_session(state: &AppState) -> Result<serde_json::Value, ApiError> {
    Ok(json!({
        "session": state.session.as_ref().map(session_json)
    }))
}

fn change_password(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let session = state.session.as_ref().ok_or(ApiError::AccessDenied)?;
    let target = opt_i64(params, "userId").unwrap_or(session.user_id);
    if target != session.user_id {
        // Only admins may reset someone else's password.
        authorize(state.session.as_ref(), &[Role::Admin])?;
    }
    let new_password = require_str(params, "newPassword")?;
    let conn = require_db(state)?;
    credentials::change_password(conn, target, &new_password)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(respond(&req.id, login(state, &req.params))),
        "auth.logout" => Some(respond(&req.id, logout(state))),
        "auth.session" => Some(respond(&req.id, current_session(state))),
        "auth.changePassword" => Some(respond(&req.id, change_password(state, &req.params))),
        _ => None,
    }
}
