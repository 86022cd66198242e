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

fn titles(resp: &serde_json::Value) -> Vec<String> {
    resp["result"]["announcements"]
        .as_array()
        .expect("announcements array")
        .iter()
        .filter_map(|a| a["title"].as_str().map(|s| s.to_string()))
        .collect()
}

#[test]
fn targeted_posts_reach_only_the_named_role() {
    let workspace = temp_dir("acadboost-announce");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123");

    let general = request(
        &mut stdin,
        &mut reader,
        "3",
        "announcements.post",
        json!({ "title": "Campus closed Friday", "content": "Maintenance." }),
    );
    assert_eq!(general.get("ok").and_then(|v| v.as_bool()), Some(true));

    let students_only = request(
        &mut stdin,
        &mut reader,
        "4",
        "announcements.post",
        json!({
            "title": "Exam hall allocation",
            "content": "Check the notice board.",
            "targetRole": "student"
        }),
    );
    let students_only_id = students_only["result"]["announcementId"]
        .as_i64()
        .expect("announcementId");

    let bad_target = request(
        &mut stdin,
        &mut reader,
        "5",
        "announcements.post",
        json!({ "title": "x", "content": "y", "targetRole": "janitor" }),
    );
    assert_eq!(error_code(&bad_target), "bad_params");

    // Teachers miss the student-targeted post.
    let _ = login(&mut stdin, &mut reader, "6", "teacher1", "teacher123");
    let seen = titles(&request(
        &mut stdin,
        &mut reader,
        "7",
        "announcements.list",
        json!({}),
    ));
    assert!(seen.contains(&"Campus closed Friday".to_string()));
    assert!(!seen.contains(&"Exam hall allocation".to_string()));

    // Students get both.
    let _ = login(&mut stdin, &mut reader, "8", "student1", "student123");
    let seen = titles(&request(
        &mut stdin,
        &mut reader,
        "9",
        "announcements.list",
        json!({}),
    ));
    assert!(seen.contains(&"Campus closed Friday".to_string()));
    assert!(seen.contains(&"Exam hall allocation".to_string()));

    // Students cannot post.
    let student_post = request(
        &mut stdin,
        &mut reader,
        "10",
        "announcements.post",
        json!({ "title": "Party", "content": "My place." }),
    );
    assert_eq!(error_code(&student_post), "access_denied");

    // Teachers can only retire their own posts; admins anything.
    let _ = login(&mut stdin, &mut reader, "11", "teacher1", "teacher123");
    let not_mine = request(
        &mut stdin,
        &mut reader,
        "12",
        "announcements.retire",
        json!({ "announcementId": students_only_id }),
    );
    assert_eq!(error_code(&not_mine), "not_found");

    let own = request(
        &mut stdin,
        &mut reader,
        "13",
        "announcements.post",
        json!({ "title": "Office hours moved", "content": "Now at 3pm." }),
    );
    let own_id = own["result"]["announcementId"].as_i64().expect("announcementId");
    let retired = request(
        &mut stdin,
        &mut reader,
        "14",
        "announcements.retire",
        json!({ "announcementId": own_id }),
    );
    assert_eq!(retired.get("ok").and_then(|v| v.as_bool()), Some(true));

    let _ = login(&mut stdin, &mut reader, "15", "admin", "admin123");
    let admin_retire = request(
        &mut stdin,
        &mut reader,
        "16",
        "announcements.retire",
        json!({ "announcementId": students_only_id }),
    );
    assert_eq!(admin_retire.get("ok").and_then(|v| v.as_bool()), Some(true));

    // Retired posts drop out of every listing.
    let _ = login(&mut stdin, &mut reader, "17", "student1", "student123");
    let seen = titles(&request(
        &mut stdin,
        &mut reader,
        "18",
        "announcements.list",
        json!({}),
    ));
    assert!(!seen.contains(&"Exam hall allocation".to_string()));
    assert!(!seen.contains(&"Office hours moved".to_string()));
    assert!(seen.contains(&"Campus closed Friday".to_string()));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
