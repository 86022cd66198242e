//! Project records follow the assignment lifecycle: created by a teacher,
//! submitted by the owning student, graded once, then terminal.

use rusqlite::OptionalExtension;
use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{
    opt_f64, opt_i64, opt_str, reject_fields, require_db, require_i64, require_str,
    student_enrolled, subject_taught_by,
};
use crate::ipc::types::{AppState, Request};

fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let title = require_str(params, "title")?;
    let subject_id = require_i64(params, "subjectId")?;

    if !subject_taught_by(conn, subject_id, session.user_id)? {
        return Err(ApiError::AccessDenied);
    }

    conn.execute(
        "INSERT INTO projects(title, description, subject_id, teacher_id, start_date, end_date, max_marks, created_at, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &title,
            opt_str(params, "description"),
            subject_id,
            session.user_id,
            opt_str(params, "startDate"),
            opt_str(params, "endDate"),
            opt_i64(params, "maxMarks").unwrap_or(100),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "projectId": conn.last_insert_rowid(), "title": title }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let subject_filter = opt_i64(params, "subjectId");

    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        Role::Teacher => format!("p.teacher_id = {}", session.user_id),
        Role::Student => format!(
            "p.subject_id IN (SELECT subject_id FROM enrollments
              WHERE student_id = {} AND status = 'active')",
            session.user_id
        ),
    };
    let sql = format!(
        "SELECT p.id, p.title, p.description, p.subject_id, s.name,
                p.start_date, p.end_date, p.max_marks
         FROM projects p
         JOIN subjects s ON s.id = p.subject_id
         WHERE p.is_active = 1 AND {scope} AND (?1 IS NULL OR p.subject_id = ?1)
         ORDER BY p.end_date, p.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let projects = stmt
        .query_map([subject_filter], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "subjectId": r.get::<_, i64>(3)?,
                "subjectName": r.get::<_, String>(4)?,
                "startDate": r.get::<_, Option<String>>(5)?,
                "endDate": r.get::<_, Option<String>>(6)?,
                "maxMarks": r.get::<_, i64>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "projects": projects }))
}

fn submit(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Student])?;
    let conn = require_db(state)?;
    reject_fields(
        params,
        &["marksObtained", "grade", "status", "feedback", "gradedBy", "gradedAt"],
    )?;
    let project_id = require_i64(params, "projectId")?;

    let subject_id: Option<i64> = conn
        .query_row(
            "SELECT subject_id FROM projects WHERE id = ? AND is_active = 1",
            [project_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(subject_id) = subject_id else {
        return Err(ApiError::NotFound("project"));
    };
    if !student_enrolled(conn, session.user_id, subject_id)? {
        return Err(ApiError::AccessDenied);
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM project_submissions WHERE project_id = ? AND student_id = ?",
            (project_id, session.user_id),
            |r| r.get(0),
        )
        .optional()?;
    if existing.as_deref() == Some("graded") {
        return Err(ApiError::InvalidTransition(
            "project is already graded".to_string(),
        ));
    }

    conn.execute(
        "INSERT INTO project_submissions(project_id, student_id, title, description, file_path, github_url, submitted_at, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'submitted')
         ON CONFLICT(project_id, student_id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           file_path = excluded.file_path,
           github_url = excluded.github_url,
           submitted_at = excluded.submitted_at",
        (
            project_id,
            session.user_id,
            opt_str(params, "title"),
            opt_str(params, "description"),
            opt_str(params, "filePath"),
            opt_str(params, "githubUrl"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "projectId": project_id, "status": "submitted" }))
}

fn grade(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let project_id = require_i64(params, "projectId")?;
    let student_id = require_i64(params, "studentId")?;
    let marks = opt_f64(params, "marksObtained")
        .ok_or_else(|| ApiError::BadParams("missing marksObtained".to_string()))?;

    let project: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT subject_id, teacher_id, max_marks FROM projects WHERE id = ?",
            [project_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((subject_id, owner_id, max_marks)) = project else {
        return Err(ApiError::NotFound("project"));
    };
    if owner_id != session.user_id && !subject_taught_by(conn, subject_id, session.user_id)? {
        return Err(ApiError::AccessDenied);
    }
    if marks < 0.0 || marks > max_marks as f64 {
        return Err(ApiError::BadParams(format!(
            "marks must be between 0 and {max_marks}"
        )));
    }

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM project_submissions WHERE project_id = ? AND student_id = ?",
            (project_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    match status.as_deref() {
        None => return Err(ApiError::NotFound("submission")),
        Some("graded") => {
            return Err(ApiError::InvalidTransition(
                "submission is already graded".to_string(),
            ))
        }
        Some(_) => {}
    }

    conn.execute(
        "UPDATE project_submissions
         SET status = 'graded', marks_obtained = ?, feedback = ?, graded_by = ?, graded_at = ?
         WHERE project_id = ? AND student_id = ?",
        (
            marks,
            opt_str(params, "feedback"),
            session.user_id,
            chrono::Utc::now().to_rfc3339(),
            project_id,
            student_id,
        ),
    )?;
    Ok(json!({
        "projectId": project_id,
        "studentId": student_id,
        "status": "graded",
        "marksObtained": marks
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "projects.create" => Some(respond(&req.id, create(state, &req.params))),
        "projects.list" => Some(respond(&req.id, list(state, &req.params))),
        "projects.submit" => Some(respond(&req.id, submit(state, &req.params))),
        "projects.grade" => Some(respond(&req.id, grade(state, &req.params))),
        _ => None,
    }
}
