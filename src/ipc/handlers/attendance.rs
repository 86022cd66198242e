use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{
    opt_i64, require_db, require_i64, require_str, require_user_with_role, student_enrolled,
    subject_taught_by,
};
use crate::ipc::types::{AppState, Request};

const DAY_STATUSES: &[&str] = &["present", "absent", "late"];

fn mark(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Teacher])?;
    let conn = require_db(state)?;
    let student_id = require_i64(params, "studentId")?;
    let subject_id = require_i64(params, "subjectId")?;
    let date = require_str(params, "date")?;
    let status = require_str(params, "status")?;

    if !DAY_STATUSES.contains(&status.as_str()) {
        return Err(ApiError::BadParams(format!(
            "status must be one of present/absent/late, got {status}"
        )));
    }
    if !subject_taught_by(conn, subject_id, session.user_id)? {
        return Err(ApiError::AccessDenied);
    }
    require_user_with_role(conn, student_id, Role::Student, "student")?;
    if !student_enrolled(conn, student_id, subject_id)? {
        return Err(ApiError::Conflict("student is not enrolled".to_string()));
    }

    // One row per student/subject/day; a second mark for the day corrects it.
    conn.execute(
        "INSERT INTO attendance(student_id, subject_id, date, status, marked_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, date) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by",
        (
            student_id,
            subject_id,
            &date,
            &status,
            session.user_id,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "studentId": student_id, "subjectId": subject_id, "date": date, "status": status }))
}

/// Derived read, computed on demand; nothing here is cached.
/// A late arrival still counts as attended for the percentage.
fn summary(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let student_filter = opt_i64(params, "studentId");
    let subject_filter = opt_i64(params, "subjectId");

    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        Role::Teacher => format!(
            "a.subject_id IN (SELECT id FROM subjects WHERE teacher_id = {})",
            session.user_id
        ),
        Role::Student => {
            if student_filter.is_some() && student_filter != Some(session.user_id) {
                return Err(ApiError::AccessDenied);
            }
            format!("a.student_id = {}", session.user_id)
        }
    };

    let sql = format!(
        "SELECT a.student_id, u.full_name, a.subject_id, s.name,
                COUNT(*) AS total,
                SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) AS present,
                SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END) AS late,
                SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END) AS absent
         FROM attendance a
         JOIN users u ON u.id = a.student_id
         JOIN subjects s ON s.id = a.subject_id
         WHERE {scope}
           AND (?1 IS NULL OR a.student_id = ?1)
           AND (?2 IS NULL OR a.subject_id = ?2)
         GROUP BY a.student_id, a.subject_id
         ORDER BY u.full_name, s.code"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((student_filter, subject_filter), |r| {
            let total: i64 = r.get(4)?;
            let present: i64 = r.get(5)?;
            let late: i64 = r.get(6)?;
            let absent: i64 = r.get(7)?;
            let percentage = if total > 0 {
                (present + late) as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            Ok(json!({
                "studentId": r.get::<_, i64>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "subjectId": r.get::<_, i64>(2)?,
                "subjectName": r.get::<_, String>(3)?,
                "totalDays": total,
                "present": present,
                "late": late,
                "absent": absent,
                "percentage": percentage,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "summary": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(respond(&req.id, mark(state, &req.params))),
        "attendance.summary" => Some(respond(&req.id, summary(state, &req.params))),
        _ => None,
    }
}
