use serde_json::json;

use crate::access::{authorize, Role};
use crate::credentials;
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{opt_str, require_db, require_i64, require_str};
use crate::ipc::types::{AppState, Request};

fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;

    let username = require_str(params, "username")?;
    let password = require_str(params, "password")?;
    let role_raw = require_str(params, "role")?;
    let full_name = require_str(params, "fullName")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| ApiError::BadParams(format!("unknown role: {}", role_raw)))?;

    let user_id = credentials::create_user(
        conn,
        &username,
        &password,
        role,
        &full_name,
        opt_str(params, "email").as_deref(),
        opt_str(params, "department").as_deref(),
    )?;
    Ok(json!({ "userId": user_id, "username": username, "role": role.as_str() }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin, Role::Teacher])?;
    let conn = require_db(state)?;

    // Teachers only see students enrolled in subjects they teach.
    let (sql, bind): (&str, Option<i64>) = match session.role {
        Role::Admin => (
            "SELECT id, username, role, full_name, email, department, is_active
             FROM users ORDER BY role, username",
            None,
        ),
        _ => (
            "SELECT DISTINCT u.id, u.username, u.role, u.full_name, u.email, u.department, u.is_active
             FROM users u
             JOIN enrollments e ON e.student_id = u.id
             JOIN subjects s ON s.id = e.subject_id
             WHERE s.teacher_id = ? AND u.role = 'student'
             ORDER BY u.username",
            Some(session.user_id),
        ),
    };
    let role_filter = opt_str(params, "role");

    let mut stmt = conn.prepare(sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "username": r.get::<_, String>(1)?,
            "role": r.get::<_, String>(2)?,
            "fullName": r.get::<_, String>(3)?,
            "email": r.get::<_, Option<String>>(4)?,
            "department": r.get::<_, Option<String>>(5)?,
            "isActive": r.get::<_, i64>(6)? != 0,
        }))
    };
    let rows = match bind {
        Some(id) => stmt
            .query_map([id], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
    };
    let users: Vec<serde_json::Value> = match role_filter {
        Some(role) => rows
            .into_iter()
            .filter(|u| u.get("role").and_then(|v| v.as_str()) == Some(role.as_str()))
            .collect(),
        None => rows,
    };
    Ok(json!({ "users": users }))
}

/// Reference counts that block a user delete. Deleting a referenced user
/// would orphan academic history, so the delete is refused instead of
/// cascading (policy recorded in DESIGN.md).
const REFERENCE_CHECKS: &[(&str, &str)] = &[
    ("enrollments", "SELECT COUNT(*) FROM enrollments WHERE student_id = ?1"),
    ("attendance", "SELECT COUNT(*) FROM attendance WHERE student_id = ?1 OR marked_by = ?1"),
    ("assignments", "SELECT COUNT(*) FROM assignments WHERE teacher_id = ?1"),
    (
        "assignment_submissions",
        "SELECT COUNT(*) FROM assignment_submissions WHERE student_id = ?1 OR graded_by = ?1",
    ),
    ("projects", "SELECT COUNT(*) FROM projects WHERE teacher_id = ?1"),
    (
        "project_submissions",
        "SELECT COUNT(*) FROM project_submissions WHERE student_id = ?1 OR graded_by = ?1",
    ),
    ("results", "SELECT COUNT(*) FROM results WHERE student_id = ?1"),
    (
        "certificates",
        "SELECT COUNT(*) FROM certificates WHERE student_id = ?1 OR issued_by = ?1",
    ),
    ("announcements", "SELECT COUNT(*) FROM announcements WHERE posted_by = ?1"),
    ("resumes", "SELECT COUNT(*) FROM resumes WHERE student_id = ?1"),
    ("subjects", "SELECT COUNT(*) FROM subjects WHERE teacher_id = ?1"),
    ("departments", "SELECT COUNT(*) FROM departments WHERE head_id = ?1"),
];

fn delete(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let user_id = require_i64(params, "userId")?;

    if user_id == session.user_id {
        return Err(ApiError::Conflict(
            "cannot delete the logged-in account".to_string(),
        ));
    }

    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?",
        [user_id],
        |r| r.get(0),
    )?;
    if exists == 0 {
        return Err(ApiError::NotFound("user"));
    }

    let mut referenced: Vec<&str> = Vec::new();
    for (table, sql) in REFERENCE_CHECKS {
        let count: i64 = conn.query_row(sql, [user_id], |r| r.get(0))?;
        if count > 0 {
            referenced.push(table);
        }
    }
    if !referenced.is_empty() {
        return Err(ApiError::Conflict(format!(
            "user is referenced by: {}",
            referenced.join(", ")
        )));
    }

    conn.execute("DELETE FROM users WHERE id = ?", [user_id])?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(respond(&req.id, create(state, &req.params))),
        "users.list" => Some(respond(&req.id, list(state, &req.params))),
        "users.delete" => Some(respond(&req.id, delete(state, &req.params))),
        _ => None,
    }
}
