use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{
    opt_f64, opt_i64, opt_str, require_db, require_i64, require_user_with_role, student_enrolled,
    subject_taught_by,
};
use crate::ipc::types::{AppState, Request};

fn upsert(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let student_id = require_i64(params, "studentId")?;
    let subject_id = require_i64(params, "subjectId")?;
    let semester = require_i64(params, "semester")?;

    if !subject_taught_by(conn, subject_id, session.user_id)? {
        return Err(ApiError::AccessDenied);
    }
    require_user_with_role(conn, student_id, Role::Student, "student")?;
    if !student_enrolled(conn, student_id, subject_id)? {
        return Err(ApiError::Conflict("student is not enrolled".to_string()));
    }

    let assignment_marks = opt_f64(params, "assignmentMarks").unwrap_or(0.0);
    let project_marks = opt_f64(params, "projectMarks").unwrap_or(0.0);
    let attendance_percentage = opt_f64(params, "attendancePercentage").unwrap_or(0.0);
    let exam_marks = opt_f64(params, "examMarks").unwrap_or(0.0);
    let total_marks = opt_f64(params, "totalMarks").unwrap_or(0.0);

    conn.execute(
        "INSERT INTO results(student_id, subject_id, semester, assignment_marks, project_marks,
                             attendance_percentage, exam_marks, total_marks, grade, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, semester) DO UPDATE SET
           assignment_marks = excluded.assignment_marks,
           project_marks = excluded.project_marks,
           attendance_percentage = excluded.attendance_percentage,
           exam_marks = excluded.exam_marks,
           total_marks = excluded.total_marks,
           grade = excluded.grade",
        (
            student_id,
            subject_id,
            semester,
            assignment_marks,
            project_marks,
            attendance_percentage,
            exam_marks,
            total_marks,
            opt_str(params, "grade"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "studentId": student_id, "subjectId": subject_id, "semester": semester }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let student_filter = opt_i64(params, "studentId");
    let subject_filter = opt_i64(params, "subjectId");
    let semester_filter = opt_i64(params, "semester");

    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        Role::Teacher => format!(
            "r.subject_id IN (SELECT id FROM subjects WHERE teacher_id = {})",
            session.user_id
        ),
        Role::Student => {
            if student_filter.is_some() && student_filter != Some(session.user_id) {
                return Err(ApiError::AccessDenied);
            }
            format!("r.student_id = {}", session.user_id)
        }
    };

    let sql = format!(
        "SELECT r.id, r.student_id, u.full_name, r.subject_id, s.name, r.semester,
                r.assignment_marks, r.project_marks, r.attendance_percentage,
                r.exam_marks, r.total_marks, r.grade
         FROM results r
         JOIN users u ON u.id = r.student_id
         JOIN subjects s ON s.id = r.subject_id
         WHERE {scope}
           AND (?1 IS NULL OR r.student_id = ?1)
           AND (?2 IS NULL OR r.subject_id = ?2)
           AND (?3 IS NULL OR r.semester = ?3)
         ORDER BY r.semester, s.code, u.full_name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map((student_filter, subject_filter, semester_filter), |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "subjectId": r.get::<_, i64>(3)?,
                "subjectName": r.get::<_, String>(4)?,
                "semester": r.get::<_, i64>(5)?,
                "assignmentMarks": r.get::<_, f64>(6)?,
                "projectMarks": r.get::<_, f64>(7)?,
                "attendancePercentage": r.get::<_, f64>(8)?,
                "examMarks": r.get::<_, f64>(9)?,
                "totalMarks": r.get::<_, f64>(10)?,
                "grade": r.get::<_, Option<String>>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.upsert" => Some(respond(&req.id, upsert(state, &req.params))),
        "results.list" => Some(respond(&req.id, list(state, &req.params))),
        _ => None,
    }
}
