use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{opt_i64, opt_str, require_db, require_i64, require_str, require_user_with_role};
use crate::ipc::types::{AppState, Request};

/// Certificate rows are write-once. Re-issuing produces a new row with a
/// fresh serial; the PDF itself is rendered elsewhere and referenced by path.
fn issue(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin, Role::Teacher])?;
    let conn = require_db(state)?;
    let student_id = require_i64(params, "studentId")?;
    let title = require_str(params, "title")?;

    require_user_with_role(conn, student_id, Role::Student, "student")?;

    let now = chrono::Utc::now();
    let certificate_no = format!(
        "CERT-{}-{}",
        now.format("%Y"),
        Uuid::new_v4().simple().to_string()[..8].to_uppercase()
    );
    conn.execute(
        "INSERT INTO certificates(student_id, certificate_type, title, description, issue_date,
                                  certificate_no, file_path, issued_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            student_id,
            opt_str(params, "certificateType"),
            &title,
            opt_str(params, "description"),
            opt_str(params, "issueDate").unwrap_or_else(|| now.format("%Y-%m-%d").to_string()),
            &certificate_no,
            opt_str(params, "filePath"),
            session.user_id,
            now.to_rfc3339(),
        ),
    )?;
    Ok(json!({
        "certificateId": conn.last_insert_rowid(),
        "certificateNo": certificate_no,
        "studentId": student_id
    }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let student_filter = opt_i64(params, "studentId");

    let scope = match session.role {
        Role::Student => {
            if student_filter.is_some() && student_filter != Some(session.user_id) {
                return Err(ApiError::AccessDenied);
            }
            format!("c.student_id = {}", session.user_id)
        }
        _ => "1 = 1".to_string(),
    };
    let sql = format!(
        "SELECT c.id, c.student_id, u.full_name, c.certificate_type, c.title,
                c.issue_date, c.certificate_no, c.file_path, i.full_name
         FROM certificates c
         JOIN users u ON u.id = c.student_id
         JOIN users i ON i.id = c.issued_by
         WHERE {scope} AND (?1 IS NULL OR c.student_id = ?1)
         ORDER BY c.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let certificates = stmt
        .query_map([student_filter], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "certificateType": r.get::<_, Option<String>>(3)?,
                "title": r.get::<_, String>(4)?,
                "issueDate": r.get::<_, Option<String>>(5)?,
                "certificateNo": r.get::<_, String>(6)?,
                "filePath": r.get::<_, Option<String>>(7)?,
                "issuedBy": r.get::<_, String>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "certificates": certificates }))
}

fn verify(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    authorize(
        state.session.as_ref(),
        &[Role::Admin, Role::Teacher, Role::Student],
    )?;
    let conn = require_db(state)?;
    let certificate_no = require_str(params, "certificateNo")?;

    let row: Option<(i64, String, String, Option<String>, String)> = conn
        .query_row(
            "SELECT c.id, u.full_name, c.title, c.issue_date, i.full_name
             FROM certificates c
             JOIN users u ON u.id = c.student_id
             JOIN users i ON i.id = c.issued_by
             WHERE c.certificate_no = ?",
            [&certificate_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((id, student, title, issue_date, issuer)) = row else {
        return Err(ApiError::NotFound("certificate"));
    };
    Ok(json!({
        "certificateId": id,
        "certificateNo": certificate_no,
        "studentName": student,
        "title": title,
        "issueDate": issue_date,
        "issuedBy": issuer,
        "valid": true
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "certificates.issue" => Some(respond(&req.id, issue(state, &req.params))),
        "certificates.list" => Some(respond(&req.id, list(state, &req.params))),
        "certificates.verify" => Some(respond(&req.id, verify(state, &req.params))),
        _ => None,
    }
}
