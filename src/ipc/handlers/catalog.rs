use rusqlite::OptionalExtension;
use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{
    opt_i64, require_db, require_i64, require_str, require_user_with_role, subject_exists,
};
use crate::ipc::types::{AppState, Request};

const ANY_ROLE: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];

fn departments_create(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let name = require_str(params, "name")?.trim().to_string();
    let code = require_str(params, "code")?.trim().to_string();
    if name.is_empty() || code.is_empty() {
        return Err(ApiError::BadParams("name and code must not be empty".to_string()));
    }

    let taken: Option<i64> = conn
        .query_row(
            "SELECT id FROM departments WHERE name = ? OR code = ?",
            (&name, &code),
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(ApiError::Conflict(format!(
            "department name or code already exists: {name} / {code}"
        )));
    }

    conn.execute(
        "INSERT INTO departments(name, code, head_id, created_at) VALUES(?, ?, ?, ?)",
        (&name, &code, opt_i64(params, "headId"), chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(json!({ "departmentId": conn.last_insert_rowid(), "name": name, "code": code }))
}

fn departments_list(state: &AppState) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), ANY_ROLE)?;
    let conn = require_db(state)?;
    let mut stmt = conn.prepare(
        "SELECT
           d.id,
           d.name,
           d.code,
           (SELECT COUNT(*) FROM subjects s WHERE s.department_id = d.id) AS subject_count
         FROM departments d
         ORDER BY d.name",
    )?;
    let departments = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "subjectCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "departments": departments }))
}

fn departments_delete(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let department_id = require_i64(params, "departmentId")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM departments WHERE id = ?", [department_id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(ApiError::NotFound("department"));
    }
    let subjects: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE department_id = ?",
        [department_id],
        |r| r.get(0),
    )?;
    if subjects > 0 {
        return Err(ApiError::Conflict(format!(
            "department still has {subjects} subject(s)"
        )));
    }
    conn.execute("DELETE FROM departments WHERE id = ?", [department_id])?;
    Ok(json!({ "ok": true }))
}

fn subjects_create(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let name = require_str(params, "name")?;
    let code = require_str(params, "code")?;
    let department_id = require_i64(params, "departmentId")?;
    let teacher_id = opt_i64(params, "teacherId");

    let dept: Option<i64> = conn
        .query_row("SELECT 1 FROM departments WHERE id = ?", [department_id], |r| r.get(0))
        .optional()?;
    if dept.is_none() {
        return Err(ApiError::NotFound("department"));
    }
    if let Some(teacher_id) = teacher_id {
        require_user_with_role(conn, teacher_id, Role::Teacher, "teacher")?;
    }
    let taken: Option<i64> = conn
        .query_row("SELECT id FROM subjects WHERE code = ?", [&code], |r| r.get(0))
        .optional()?;
    if taken.is_some() {
        return Err(ApiError::Conflict(format!("subject code already exists: {code}")));
    }

    conn.execute(
        "INSERT INTO subjects(name, code, department_id, teacher_id, credits, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &name,
            &code,
            department_id,
            teacher_id,
            opt_i64(params, "credits").unwrap_or(3),
            opt_i64(params, "semester"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "subjectId": conn.last_insert_rowid(), "code": code }))
}

fn subjects_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), ANY_ROLE)?;
    let conn = require_db(state)?;
    let department_id = opt_i64(params, "departmentId");

    let sql = "SELECT
                 s.id, s.name, s.code, s.credits, s.semester,
                 d.name AS department,
                 u.full_name AS teacher
               FROM subjects s
               LEFT JOIN departments d ON d.id = s.department_id
               LEFT JOIN users u ON u.id = s.teacher_id
               WHERE (?1 IS NULL OR s.department_id = ?1)
               ORDER BY s.code";
    let mut stmt = conn.prepare(sql)?;
    let subjects = stmt
        .query_map([department_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "semester": r.get::<_, Option<i64>>(4)?,
                "department": r.get::<_, Option<String>>(5)?,
                "teacher": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_delete(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let subject_id = require_i64(params, "subjectId")?;

    if !subject_exists(conn, subject_id)? {
        return Err(ApiError::NotFound("subject"));
    }
    let referenced: i64 = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM enrollments WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM attendance WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM assignments WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM projects WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM results WHERE subject_id = ?1)",
        [subject_id],
        |r| r.get(0),
    )?;
    if referenced > 0 {
        return Err(ApiError::Conflict(
            "subject still has academic records".to_string(),
        ));
    }
    conn.execute("DELETE FROM subjects WHERE id = ?", [subject_id])?;
    Ok(json!({ "ok": true }))
}

fn enrollments_create(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin])?;
    let conn = require_db(state)?;
    let student_id = require_i64(params, "studentId")?;
    let subject_id = require_i64(params, "subjectId")?;

    require_user_with_role(conn, student_id, Role::Student, "student")?;
    if !subject_exists(conn, subject_id)? {
        return Err(ApiError::NotFound("subject"));
    }
    let already: Option<i64> = conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND subject_id = ?",
            (student_id, subject_id),
            |r| r.get(0),
        )
        .optional()?;
    if already.is_some() {
        return Err(ApiError::Conflict("student already enrolled".to_string()));
    }

    conn.execute(
        "INSERT INTO enrollments(student_id, subject_id, enrolled_at) VALUES(?, ?, ?)",
        (student_id, subject_id, chrono::Utc::now().to_rfc3339()),
    )?;
    Ok(json!({ "enrollmentId": conn.last_insert_rowid() }))
}

fn enrollments_list(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), ANY_ROLE)?;
    let conn = require_db(state)?;
    let subject_filter = opt_i64(params, "subjectId");

    // Students see their own rows; teachers the rows of subjects they teach.
    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        Role::Teacher => format!("s.teacher_id = {}", session.user_id),
        Role::Student => format!("e.student_id = {}", session.user_id),
    };
    let sql = format!(
        "SELECT e.id, e.student_id, u.full_name, e.subject_id, s.name, e.status, e.enrolled_at
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         JOIN subjects s ON s.id = e.subject_id
         WHERE {scope} AND (?1 IS NULL OR e.subject_id = ?1)
         ORDER BY s.code, u.full_name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let enrollments = stmt
        .query_map([subject_filter], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "subjectId": r.get::<_, i64>(3)?,
                "subjectName": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "enrolledAt": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": enrollments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.create" => Some(respond(&req.id, departments_create(state, &req.params))),
        "departments.list" => Some(respond(&req.id, departments_list(state))),
        "departments.delete" => Some(respond(&req.id, departments_delete(state, &req.params))),
        "subjects.create" => Some(respond(&req.id, subjects_create(state, &req.params))),
        "subjects.list" => Some(respond(&req.id, subjects_list(state, &req.params))),
        "subjects.delete" => Some(respond(&req.id, subjects_delete(state, &req.params))),
        "enrollments.create" => Some(respond(&req.id, enrollments_create(state, &req.params))),
        "enrollments.list" => Some(respond(&req.id, enrollments_list(state, &req.params))),
        _ => None,
    }
}
