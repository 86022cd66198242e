use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{opt_i64, opt_str, require_db, require_i64, require_str};
use crate::ipc::types::{AppState, Request};

fn post(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin, Role::Teacher])?;
    let conn = require_db(state)?;
    let title = require_str(params, "title")?;
    let content = require_str(params, "content")?;
    let target_role = opt_str(params, "targetRole");
    if let Some(role) = target_role.as_deref() {
        if Role::parse(role).is_none() {
            return Err(ApiError::BadParams(format!("unknown target role: {role}")));
        }
    }

    conn.execute(
        "INSERT INTO announcements(title, content, posted_by, target_role, department_id, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &title,
            &content,
            session.user_id,
            target_role,
            opt_i64(params, "departmentId"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "announcementId": conn.last_insert_rowid(), "title": title }))
}

fn list(state: &AppState) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;

    // Untargeted announcements are visible to everyone; targeted ones only
    // to the named role. Admins see everything.
    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        role => format!(
            "(a.target_role IS NULL OR a.target_role = '{}')",
            role.as_str()
        ),
    };
    let sql = format!(
        "SELECT a.id, a.title, a.content, u.full_name, a.target_role, a.department_id, a.created_at
         FROM announcements a
         JOIN users u ON u.id = a.posted_by
         WHERE a.is_active = 1 AND {scope}
         ORDER BY a.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let announcements = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "title": r.get::<_, String>(1)?,
                "content": r.get::<_, String>(2)?,
                "postedBy": r.get::<_, String>(3)?,
                "targetRole": r.get::<_, Option<String>>(4)?,
                "departmentId": r.get::<_, Option<i64>>(5)?,
                "createdAt": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "announcements": announcements }))
}

fn retire(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin, Role::Teacher])?;
    let conn = require_db(state)?;
    let announcement_id = require_i64(params, "announcementId")?;

    // Teachers may only retire their own posts; admins any.
    let updated = match session.role {
        Role::Admin => conn.execute(
            "UPDATE announcements SET is_active = 0 WHERE id = ?",
            [announcement_id],
        )?,
        _ => conn.execute(
            "UPDATE announcements SET is_active = 0 WHERE id = ? AND posted_by = ?",
            (announcement_id, session.user_id),
        )?,
    };
    if updated == 0 {
        return Err(ApiError::NotFound("announcement"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.post" => Some(respond(&req.id, post(state, &req.params))),
        "announcements.list" => Some(respond(&req.id, list(state))),
        "announcements.retire" => Some(respond(&req.id, retire(state, &req.params))),
        _ => None,
    }
}
