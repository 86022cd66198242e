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

fn subject_id_by_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    code: &str,
) -> i64 {
    let subjects = request(stdin, reader, id, "subjects.list", json!({}));
    subjects["result"]["subjects"]
        .as_array()
        .expect("subjects array")
        .iter()
        .find(|s| s["code"].as_str() == Some(code))
        .and_then(|s| s["id"].as_i64())
        .unwrap_or_else(|| panic!("subject {} not seeded", code))
}

#[test]
fn attendance_percentage_counts_late_as_attended() {
    let workspace = temp_dir("acadboost-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = login(&mut stdin, &mut reader, "2", "teacher1", "teacher123");
    let _teacher_id = teacher["result"]["session"]["userId"].as_i64().expect("userId");
    let cs201 = subject_id_by_code(&mut stdin, &mut reader, "3", "CS201");

    let users = request(&mut stdin, &mut reader, "4", "users.list", json!({}));
    let student_id = users["result"]["users"]
        .as_array()
        .expect("users")
        .iter()
        .find(|u| u["username"].as_str() == Some("student1"))
        .and_then(|u| u["id"].as_i64())
        .expect("student1 id");

    for (i, (date, status)) in [
        ("2025-01-06", "present"),
        ("2025-01-07", "late"),
        ("2025-01-08", "absent"),
    ]
    .iter()
    .enumerate()
    {
        let id = format!("m{}", i);
        let resp = request(
            &mut stdin,
            &mut reader,
            &id,
            "attendance.mark",
            json!({ "studentId": student_id, "subjectId": cs201, "date": date, "status": status }),
        );
        assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));
    }

    let bogus = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "studentId": student_id, "subjectId": cs201, "date": "2025-01-09", "status": "sick" }),
    );
    assert_eq!(error_code(&bogus), "bad_params");

    let summary = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.summary",
        json!({ "studentId": student_id, "subjectId": cs201 }),
    );
    let row = &summary["result"]["summary"][0];
    assert_eq!(row["totalDays"].as_i64(), Some(3));
    assert_eq!(row["present"].as_i64(), Some(1));
    assert_eq!(row["late"].as_i64(), Some(1));
    assert_eq!(row["absent"].as_i64(), Some(1));
    let pct = row["percentage"].as_f64().expect("percentage");
    assert!((pct - 200.0 / 3.0).abs() < 0.01, "pct was {}", pct);

    // A second mark for the same day corrects the record instead of stacking.
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "studentId": student_id, "subjectId": cs201, "date": "2025-01-08", "status": "present" }),
    );
    let summary = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.summary",
        json!({ "studentId": student_id, "subjectId": cs201 }),
    );
    let row = &summary["result"]["summary"][0];
    assert_eq!(row["totalDays"].as_i64(), Some(3));
    assert_eq!(row["percentage"].as_f64(), Some(100.0));

    // The student sees their own summary but nobody else's.
    let _ = login(&mut stdin, &mut reader, "9", "student1", "student123");
    let own = request(&mut stdin, &mut reader, "10", "attendance.summary", json!({}));
    assert_eq!(own["result"]["summary"][0]["totalDays"].as_i64(), Some(3));
    let other = request(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.summary",
        json!({ "studentId": student_id + 1 }),
    );
    assert_eq!(error_code(&other), "access_denied");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn results_upsert_and_role_scoped_listing() {
    let workspace = temp_dir("acadboost-results");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "teacher1", "teacher123");
    let cs201 = subject_id_by_code(&mut stdin, &mut reader, "3", "CS201");

    let users = request(&mut stdin, &mut reader, "4", "users.list", json!({}));
    let ids: Vec<(String, i64)> = users["result"]["users"]
        .as_array()
        .expect("users")
        .iter()
        .filter_map(|u| {
            Some((
                u["username"].as_str()?.to_string(),
                u["id"].as_i64()?,
            ))
        })
        .collect();
    let student1 = ids
        .iter()
        .find(|(name, _)| name == "student1")
        .map(|(_, id)| *id)
        .expect("student1");
    let student2 = ids
        .iter()
        .find(|(name, _)| name == "student2")
        .map(|(_, id)| *id)
        .expect("student2");

    let first = request(
        &mut stdin,
        &mut reader,
        "5",
        "results.upsert",
        json!({
            "studentId": student1,
            "subjectId": cs201,
            "semester": 3,
            "examMarks": 60.0,
            "assignmentMarks": 18.0,
            "attendancePercentage": 90.0,
            "totalMarks": 78.0,
            "grade": "B+"
        }),
    );
    assert_eq!(first.get("ok").and_then(|v| v.as_bool()), Some(true));

    // Same key again revises in place.
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "results.upsert",
        json!({
            "studentId": student1,
            "subjectId": cs201,
            "semester": 3,
            "examMarks": 65.0,
            "assignmentMarks": 18.0,
            "attendancePercentage": 90.0,
            "totalMarks": 83.0,
            "grade": "A"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "results.upsert",
        json!({
            "studentId": student2,
            "subjectId": cs201,
            "semester": 3,
            "totalMarks": 55.0,
            "grade": "C"
        }),
    );

    let all = request(&mut stdin, &mut reader, "8", "results.list", json!({}));
    let rows = all["result"]["results"].as_array().expect("results");
    assert_eq!(rows.len(), 2);
    let revised = rows
        .iter()
        .find(|r| r["studentId"].as_i64() == Some(student1))
        .expect("student1 row");
    assert_eq!(revised["totalMarks"].as_f64(), Some(83.0));
    assert_eq!(revised["grade"].as_str(), Some("A"));

    // Students only ever see themselves.
    let _ = login(&mut stdin, &mut reader, "9", "student1", "student123");
    let own = request(&mut stdin, &mut reader, "10", "results.list", json!({}));
    let rows = own["result"]["results"].as_array().expect("results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["studentId"].as_i64(), Some(student1));
    let foreign = request(
        &mut stdin,
        &mut reader,
        "11",
        "results.list",
        json!({ "studentId": student2 }),
    );
    assert_eq!(error_code(&foreign), "access_denied");

    // teacher2 teaches other subjects and sees none of these rows.
    let _ = login(&mut stdin, &mut reader, "12", "teacher2", "teacher123");
    let other = request(&mut stdin, &mut reader, "13", "results.list", json!({}));
    assert!(other["result"]["results"]
        .as_array()
        .expect("results")
        .is_empty());

    // Marking results for a subject you do not teach is refused.
    let foreign_upsert = request(
        &mut stdin,
        &mut reader,
        "14",
        "results.upsert",
        json!({ "studentId": student1, "subjectId": cs201, "semester": 3, "totalMarks": 1.0 }),
    );
    assert_eq!(error_code(&foreign_upsert), "access_denied");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
