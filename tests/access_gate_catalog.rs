use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_acadboostd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("GEMINI_API_KEY")
        .spawn()
        .expect("spawn acadboostd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    password: &str,
) -> serde_json::Value {
    let resp = request(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": username, "password": password }),
    );
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "login failed for {}",
        username
    );
    resp
}

#[test]
fn unauthenticated_and_wrong_role_are_denied() {
    let workspace = temp_dir("acadboost-gate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // No session at all.
    let resp = request(&mut stdin, &mut reader, "2", "users.list", json!({}));
    assert_eq!(error_code(&resp), "access_denied");

    // Students cannot touch admin-only surfaces.
    let _ = login(&mut stdin, &mut reader, "3", "student1", "student123");
    let denied = [
        ("users.create", json!({ "username": "x", "password": "y", "role": "student", "fullName": "X" })),
        ("users.delete", json!({ "userId": 1 })),
        ("departments.create", json!({ "name": "Civil", "code": "CE" })),
        ("subjects.create", json!({ "name": "X", "code": "X1", "departmentId": 1, "teacherId": 2, "semester": 1, "credits": 3 })),
        ("enrollments.create", json!({ "studentId": 5, "subjectId": 1 })),
        ("announcements.post", json!({ "title": "t", "content": "c" })),
        ("certificates.issue", json!({ "studentId": 5, "title": "t" })),
        ("attendance.mark", json!({ "studentId": 5, "subjectId": 1, "date": "2025-01-01", "status": "present" })),
        ("results.upsert", json!({ "studentId": 5, "subjectId": 1, "semester": 3, "totalMarks": 50 })),
        ("insights.cohort", json!({})),
    ];
    for (i, (method, params)) in denied.iter().enumerate() {
        let id = format!("d{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, params.clone());
        assert_eq!(
            error_code(&resp),
            "access_denied",
            "{} should be denied to students",
            method
        );
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn department_create_list_delete_with_conflicts() {
    let workspace = temp_dir("acadboost-catalog");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123");

    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "departments.create",
        json!({ "name": "Civil Engineering", "code": "CE" }),
    );
    assert_eq!(created.get("ok").and_then(|v| v.as_bool()), Some(true));
    let dept_id = created["result"]["departmentId"].as_i64().expect("departmentId");

    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "departments.create",
        json!({ "name": "Civil Engineering", "code": "CE2" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let listed = request(&mut stdin, &mut reader, "5", "departments.list", json!({}));
    let names: Vec<&str> = listed["result"]["departments"]
        .as_array()
        .expect("departments array")
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert!(names.contains(&"Civil Engineering"));
    assert!(names.contains(&"Computer Science & Engineering"));

    // Seeded CSE has subjects hanging off it, so it must refuse to go.
    let cse_id = listed["result"]["departments"]
        .as_array()
        .expect("departments array")
        .iter()
        .find(|d| d["code"].as_str() == Some("CSE"))
        .and_then(|d| d["id"].as_i64())
        .expect("CSE id");
    let blocked = request(
        &mut stdin,
        &mut reader,
        "6",
        "departments.delete",
        json!({ "departmentId": cse_id }),
    );
    assert_eq!(error_code(&blocked), "conflict");

    // The fresh, unreferenced one deletes cleanly.
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "departments.delete",
        json!({ "departmentId": dept_id }),
    );
    assert_eq!(gone.get("ok").and_then(|v| v.as_bool()), Some(true));
    let again = request(
        &mut stdin,
        &mut reader,
        "8",
        "departments.delete",
        json!({ "departmentId": dept_id }),
    );
    assert_eq!(error_code(&again), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subjects_and_enrollments_validate_references() {
    let workspace = temp_dir("acadboost-subjects");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123");

    let subjects = request(&mut stdin, &mut reader, "3", "subjects.list", json!({}));
    let arr = subjects["result"]["subjects"].as_array().expect("subjects");
    assert_eq!(arr.len(), 5);
    let cs201 = arr
        .iter()
        .find(|s| s["code"].as_str() == Some("CS201"))
        .expect("CS201 seeded");
    assert_eq!(cs201["teacher"].as_str(), Some("Dr. Arvind Upadhyay"));
    assert_eq!(
        cs201["department"].as_str(),
        Some("Computer Science & Engineering")
    );

    let departments = request(&mut stdin, &mut reader, "4", "departments.list", json!({}));
    let cse_id = departments["result"]["departments"]
        .as_array()
        .expect("departments")
        .iter()
        .find(|d| d["code"].as_str() == Some("CSE"))
        .and_then(|d| d["id"].as_i64())
        .expect("CSE id");

    // Duplicate subject code is a conflict.
    let dup = request(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({
            "name": "Data Structures Again",
            "code": "CS201",
            "departmentId": cse_id,
            "semester": 3,
            "credits": 4
        }),
    );
    assert_eq!(error_code(&dup), "conflict");

    // Assigning a non-teacher account to a subject is rejected.
    let users = request(&mut stdin, &mut reader, "6", "users.list", json!({ "role": "student" }));
    let student_id = users["result"]["users"]
        .as_array()
        .expect("users")
        .first()
        .and_then(|u| u["id"].as_i64())
        .expect("a student");
    let bad_teacher = request(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.create",
        json!({
            "name": "Ghost Course",
            "code": "GH101",
            "departmentId": cse_id,
            "teacherId": student_id,
            "semester": 1,
            "credits": 2
        }),
    );
    assert_eq!(error_code(&bad_teacher), "bad_params");

    // student1 is already enrolled in CS201 by the seed.
    let dup_enroll = request(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.create",
        json!({ "studentId": student_id, "subjectId": cs201["id"] }),
    );
    assert_eq!(error_code(&dup_enroll), "conflict");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
