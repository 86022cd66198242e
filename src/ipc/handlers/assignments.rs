use rusqlite::OptionalExtension;
use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{
    opt_f64, opt_i64, opt_str, reject_fields, require_db, require_i64, require_str,
    student_enrolled, subject_taught_by,
};
use crate::ipc::types::{AppState, Request};

/// Grade and status columns are teacher-exclusive; a student form may never
/// even mention them.
const STUDENT_FORBIDDEN: &[&'static str] = &[
    "marksObtained",
    "grade",
    "status",
    "feedback",
    "gradedBy",
    "gradedAt",
];

fn create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let title = require_str(params, "title")?;
    let subject_id = require_i64(params, "subjectId")?;

    if !subject_taught_by(conn, subject_id, session.user_id)? {
        return Err(ApiError::AccessDenied);
    }

    conn.execute(
        "INSERT INTO assignments(title, description, subject_id, teacher_id, due_date, max_marks, created_at, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &title,
            opt_str(params, "description"),
            subject_id,
            session.user_id,
            opt_str(params, "dueDate"),
            opt_i64(params, "maxMarks").unwrap_or(100),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "assignmentId": conn.last_insert_rowid(), "title": title }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let subject_filter = opt_i64(params, "subjectId");

    match session.role {
        Role::Student => {
            // A student sees assignments for enrolled subjects together with
            // the state of their own submission.
            let mut stmt = conn.prepare(
                "SELECT a.id, a.title, a.description, a.subject_id, s.name, a.due_date, a.max_marks,
                        sub.status, sub.marks_obtained, sub.feedback, sub.submitted_at
                 FROM assignments a
                 JOIN subjects s ON s.id = a.subject_id
                 JOIN enrollments e ON e.subject_id = a.subject_id AND e.student_id = ?1
                 LEFT JOIN assignment_submissions sub
                   ON sub.assignment_id = a.id AND sub.student_id = ?1
                 WHERE a.is_active = 1 AND (?2 IS NULL OR a.subject_id = ?2)
                 ORDER BY a.due_date, a.id",
            )?;
            let assignments = stmt
                .query_map((session.user_id, subject_filter), |r| {
                    Ok(json!({
                        "id": r.get::<_, i64>(0)?,
                        "title": r.get::<_, String>(1)?,
                        "description": r.get::<_, Option<String>>(2)?,
                        "subjectId": r.get::<_, i64>(3)?,
                        "subjectName": r.get::<_, String>(4)?,
                        "dueDate": r.get::<_, Option<String>>(5)?,
                        "maxMarks": r.get::<_, i64>(6)?,
                        "submissionStatus": r.get::<_, Option<String>>(7)?,
                        "marksObtained": r.get::<_, Option<f64>>(8)?,
                        "feedback": r.get::<_, Option<String>>(9)?,
                        "submittedAt": r.get::<_, Option<String>>(10)?,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "assignments": assignments }))
        }
        role => {
            let scope = match role {
                Role::Teacher => format!("a.teacher_id = {}", session.user_id),
                _ => "1 = 1".to_string(),
            };
            let sql = format!(
                "SELECT a.id, a.title, a.description, a.subject_id, s.name, a.due_date, a.max_marks,
                        (SELECT COUNT(*) FROM assignment_submissions x WHERE x.assignment_id = a.id) AS submissions,
                        (SELECT COUNT(*) FROM assignment_submissions x
                          WHERE x.assignment_id = a.id AND x.status = 'graded') AS graded
                 FROM assignments a
                 JOIN subjects s ON s.id = a.subject_id
                 WHERE a.is_active = 1 AND {scope} AND (?1 IS NULL OR a.subject_id = ?1)
                 ORDER BY a.due_date, a.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let assignments = stmt
                .query_map([subject_filter], |r| {
                    Ok(json!({
                        "id": r.get::<_, i64>(0)?,
                        "title": r.get::<_, String>(1)?,
                        "description": r.get::<_, Option<String>>(2)?,
                        "subjectId": r.get::<_, i64>(3)?,
                        "subjectName": r.get::<_, String>(4)?,
                        "dueDate": r.get::<_, Option<String>>(5)?,
                        "maxMarks": r.get::<_, i64>(6)?,
                        "submissionCount": r.get::<_, i64>(7)?,
                        "gradedCount": r.get::<_, i64>(8)?,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(json!({ "assignments": assignments }))
        }
    }
}

fn submit(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Student])?;
    let conn = require_db(state)?;
    reject_fields(params, STUDENT_FORBIDDEN)?;
    let assignment_id = require_i64(params, "assignmentId")?;

    let subject_id: Option<i64> = conn
        .query_row(
            "SELECT subject_id FROM assignments WHERE id = ? AND is_active = 1",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(subject_id) = subject_id else {
        return Err(ApiError::NotFound("assignment"));
    };
    if !student_enrolled(conn, session.user_id, subject_id)? {
        return Err(ApiError::AccessDenied);
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM assignment_submissions WHERE assignment_id = ? AND student_id = ?",
            (assignment_id, session.user_id),
            |r| r.get(0),
        )
        .optional()?;
    if existing.as_deref() == Some("graded") {
        return Err(ApiError::InvalidTransition(
            "assignment is already graded".to_string(),
        ));
    }

    // Re-submission before grading replaces the previous attempt.
    conn.execute(
        "INSERT INTO assignment_submissions(assignment_id, student_id, submission_text, file_path, submitted_at, status)
         VALUES(?, ?, ?, ?, ?, 'submitted')
         ON CONFLICT(assignment_id, student_id) DO UPDATE SET
           submission_text = excluded.submission_text,
           file_path = excluded.file_path,
           submitted_at = excluded.submitted_at",
        (
            assignment_id,
            session.user_id,
            opt_str(params, "submissionText"),
            opt_str(params, "filePath"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "assignmentId": assignment_id, "status": "submitted" }))
}

fn grade(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let assignment_id = require_i64(params, "assignmentId")?;
    let student_id = require_i64(params, "studentId")?;
    let marks = opt_f64(params, "marksObtained")
        .ok_or_else(|| ApiError::BadParams("missing marksObtained".to_string()))?;

    let assignment: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT subject_id, teacher_id, max_marks FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((subject_id, owner_id, max_marks)) = assignment else {
        return Err(ApiError::NotFound("assignment"));
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
            "SELECT status FROM assignment_submissions WHERE assignment_id = ? AND student_id = ?",
            (assignment_id, student_id),
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
        "UPDATE assignment_submissions
         SET status = 'graded', marks_obtained = ?, feedback = ?, graded_by = ?, graded_at = ?
         WHERE assignment_id = ? AND student_id = ?",
        (
            marks,
            opt_str(params, "feedback"),
            session.user_id,
            chrono::Utc::now().to_rfc3339(),
            assignment_id,
            student_id,
        ),
    )?;
    Ok(json!({
        "assignmentId": assignment_id,
        "studentId": student_id,
        "status": "graded",
        "marksObtained": marks
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(respond(&req.id, create(state, &req.params))),
        "assignments.list" => Some(respond(&req.id, list(state, &req.params))),
        "assignments.submit" => Some(respond(&req.id, submit(state, &req.params))),
        "assignments.grade" => Some(respond(&req.id, grade(state, &req.params))),
        _ => None,
    }
}
