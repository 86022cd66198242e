use serde_json::json;

use crate::access::{authorize, Role};
use crate::ipc::error::{respond, ApiError};
use crate::ipc::helpers::{opt_i64, opt_str, require_db, require_str};
use crate::ipc::types::{AppState, Request};

/// Resume rows are create-only; a new version is a new row and readers take
/// the newest. Files live outside the store and are referenced by path.
fn save(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Student])?;
    let conn = require_db(state)?;
    let resume_type = require_str(params, "resumeType")?;
    if resume_type != "generated" && resume_type != "uploaded" {
        return Err(ApiError::BadParams(format!(
            "resumeType must be generated or uploaded, got {resume_type}"
        )));
    }

    conn.execute(
        "INSERT INTO resumes(student_id, title, resume_type, resume_data, file_path, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            session.user_id,
            opt_str(params, "title"),
            &resume_type,
            opt_str(params, "resumeData"),
            opt_str(params, "filePath"),
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(json!({ "resumeId": conn.last_insert_rowid() }))
}

fn list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let session = authorize(state.session.as_ref(), &[Role::Admin, Role::Student])?;
    let conn = require_db(state)?;
    let student_filter = opt_i64(params, "studentId");

    let scope = match session.role {
        Role::Admin => "1 = 1".to_string(),
        _ => {
            if student_filter.is_some() && student_filter != Some(session.user_id) {
                return Err(ApiError::AccessDenied);
            }
            format!("r.student_id = {}", session.user_id)
        }
    };
    let sql = format!(
        "SELECT r.id, r.student_id, u.full_name, r.title, r.resume_type, r.file_path, r.created_at
         FROM resumes r
         JOIN users u ON u.id = r.student_id
         WHERE {scope} AND (?1 IS NULL OR r.student_id = ?1)
         ORDER BY r.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let resumes = stmt
        .query_map([student_filter], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "title": r.get::<_, Option<String>>(3)?,
                "resumeType": r.get::<_, String>(4)?,
                "filePath": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "resumes": resumes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "resumes.save" => Some(respond(&req.id, save(state, &req.params))),
        "resumes.list" => Some(respond(&req.id, list(state, &req.params))),
        _ => None,
    }
}
