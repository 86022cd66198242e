//! Insight panels: aggregate store data, hand it to the AI façade, return
//! whatever narrative text comes back. A failed or unconfigured façade only
//! takes down the panel, nothing else.

use rusqlite::Connection;
use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{require_db, require_i64};
use crate::ipc::types::{AppState, Request};

fn student_performance_rows(
    conn: &Connection,
    student_id: i64,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT s.name, r.semester, r.total_marks, r.attendance_percentage, r.grade,
                (SELECT COUNT(*) FROM assignment_submissions sub
                  WHERE sub.student_id = r.student_id) AS submissions,
                (SELECT AVG(sub.marks_obtained) FROM assignment_submissions sub
                  WHERE sub.student_id = r.student_id AND sub.marks_obtained IS NOT NULL)
         FROM results r
         JOIN subjects s ON s.id = r.subject_id
         WHERE r.student_id = ?
         ORDER BY r.semester, s.name",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(json!({
                "subject": r.get::<_, String>(0)?,
                "semester": r.get::<_, i64>(1)?,
                "totalMarks": r.get::<_, f64>(2)?,
                "attendancePercentage": r.get::<_, f64>(3)?,
                "grade": r.get::<_, Option<String>>(4)?,
                "assignmentsSubmitted": r.get::<_, i64>(5)?,
                "avgAssignmentMarks": r.get::<_, Option<f64>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn student(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let student_id = require_i64(params, "studentId")?;
    if session.role == Role::Student && student_id != session.user_id {
        return Err(ApiError::AccessDenied);
    }
    let conn = require_db(state)?;

    let name: String = conn
        .query_row(
            "SELECT full_name FROM users WHERE id = ? AND role = 'student'",
            [student_id],
            |r| r.get(0),
        )
        .map_err(|_| ApiError::NotFound("student"))?;
    let rows = student_performance_rows(conn, student_id)?;
    if rows.is_empty() {
        return Ok(json!({
            "studentId": student_id,
            "insight": "No performance data available for analysis."
        }));
    }

    let prompt = format!(
        "Analyze the following student performance data and provide insights.\n\
         Student: {name}\n\
         Data: {}\n\n\
         Please provide:\n\
         1. Overall performance assessment\n\
         2. Strengths and weaknesses\n\
         3. Specific recommendations for improvement\n\
         4. Risk factors (if any)\n\
         5. Predicted performance trends",
        serde_json::to_string(&rows).unwrap_or_default()
    );
    let insight = state.insights.summarize(&prompt)?;
    Ok(json!({ "studentId": student_id, "insight": insight }))
}

fn cohort(state: &AppState) -> Result<serde_json::Value, ApiError> {
    authorize(state.session.as_ref(), &[Role::Admin, Role::Teacher])?;
    let conn = require_db(state)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.full_name,
                AVG(r.total_marks), AVG(r.attendance_percentage),
                COUNT(DISTINCT r.subject_id),
                (SELECT COUNT(*) FROM assignment_submissions sub WHERE sub.student_id = u.id)
         FROM users u
         LEFT JOIN results r ON r.student_id = u.id
         WHERE u.role = 'student' AND u.is_active = 1
         GROUP BY u.id
         ORDER BY u.full_name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "studentId": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "avgMarks": r.get::<_, Option<f64>>(2)?,
                "avgAttendance": r.get::<_, Option<f64>>(3)?,
                "subjectsWithResults": r.get::<_, i64>(4)?,
                "totalSubmissions": r.get::<_, i64>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(json!({ "insight": "No student data available for prediction." }));
    }

    let prompt = format!(
        "Based on the following cohort performance data, predict likely outcomes\n\
         for each student and flag anyone at risk. Keep it concise and\n\
         actionable for teaching staff.\n\
         Data: {}",
        serde_json::to_string(&rows).unwrap_or_default()
    );
    let insight = state.insights.summarize(&prompt)?;
    Ok(json!({ "insight": insight, "studentsAnalyzed": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "insights.student" => Some(respond(&req.id, student(state, &req.params))),
        "insights.cohort" => Some(respond(&req.id, cohort(state))),
        _ => None,
    }
}
