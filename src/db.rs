use rusqlite::Connection;
use std::path::Path;

use crate::access::Role;
use crate::credentials;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("acadboost.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    seed_if_empty(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin','teacher','student')),
            full_name TEXT NOT NULL,
            email TEXT,
            department TEXT,
            created_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            code TEXT UNIQUE NOT NULL,
            head_id INTEGER,
            created_at TEXT,
            FOREIGN KEY(head_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            code TEXT UNIQUE NOT NULL,
            department_id INTEGER,
            teacher_id INTEGER,
            credits INTEGER NOT NULL DEFAULT 3,
            semester INTEGER,
            created_at TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_department ON subjects(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_teacher ON subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            enrolled_at TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_subject ON enrollments(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('present','absent','late')),
            marked_by INTEGER NOT NULL,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(marked_by) REFERENCES users(id),
            UNIQUE(student_id, subject_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_subject ON attendance(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            due_date TEXT,
            max_marks INTEGER NOT NULL DEFAULT 100,
            created_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_subject ON assignments(subject_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_teacher ON assignments(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_submissions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            assignment_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            submission_text TEXT,
            file_path TEXT,
            submitted_at TEXT,
            status TEXT NOT NULL DEFAULT 'submitted' CHECK(status IN ('submitted','graded')),
            marks_obtained REAL,
            feedback TEXT,
            graded_by INTEGER,
            graded_at TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(graded_by) REFERENCES users(id),
            UNIQUE(assignment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_submissions_assignment
         ON assignment_submissions(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignment_submissions_student
         ON assignment_submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            description TEXT,
            subject_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            start_date TEXT,
            end_date TEXT,
            max_marks INTEGER NOT NULL DEFAULT 100,
            created_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_subject ON projects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_submissions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            title TEXT,
            description TEXT,
            file_path TEXT,
            github_url TEXT,
            submitted_at TEXT,
            status TEXT NOT NULL DEFAULT 'submitted' CHECK(status IN ('submitted','graded')),
            marks_obtained REAL,
            feedback TEXT,
            graded_by INTEGER,
            graded_at TEXT,
            FOREIGN KEY(project_id) REFERENCES projects(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(graded_by) REFERENCES users(id),
            UNIQUE(project_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_submissions_project
         ON project_submissions(project_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_submissions_student
         ON project_submissions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            assignment_marks REAL NOT NULL DEFAULT 0,
            project_marks REAL NOT NULL DEFAULT 0,
            attendance_percentage REAL NOT NULL DEFAULT 0,
            exam_marks REAL NOT NULL DEFAULT 0,
            total_marks REAL NOT NULL DEFAULT 0,
            grade TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_subject ON results(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            certificate_type TEXT,
            title TEXT NOT NULL,
            description TEXT,
            issue_date TEXT,
            certificate_no TEXT UNIQUE NOT NULL,
            file_path TEXT,
            issued_by INTEGER NOT NULL,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(issued_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            posted_by INTEGER NOT NULL,
            target_role TEXT,
            department_id INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            FOREIGN KEY(posted_by) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resumes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            title TEXT,
            resume_type TEXT NOT NULL CHECK(resume_type IN ('generated','uploaded')),
            resume_data TEXT,
            file_path TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_resumes_student ON resumes(student_id)",
        [],
    )?;

    // Databases imported from the legacy portal predate submission states.
    ensure_submission_status(conn, "assignment_submissions")?;
    ensure_submission_status(conn, "project_submissions")?;

    Ok(())
}

fn ensure_submission_status(conn: &Connection, table: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, "status")? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {table} ADD COLUMN status TEXT NOT NULL DEFAULT 'submitted'"),
        [],
    )?;
    // Rows that already carry marks were graded before the column existed.
    conn.execute(
        &format!("UPDATE {table} SET status = 'graded' WHERE marks_obtained IS NOT NULL"),
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Bootstrap demo accounts and a small catalog on first run. Purely demo
/// data; the fixed credentials are not a security contract.
pub fn seed_if_empty(conn: &Connection) -> anyhow::Result<()> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if users > 0 {
        return Ok(());
    }
    tracing::info!("empty credential store, seeding demo accounts");

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;

    let departments = [
        ("Computer Science & Engineering", "CSE"),
        ("Information Technology", "IT"),
        ("Electronics & Communication", "ECE"),
        ("Mechanical Engineering", "ME"),
    ];
    for (name, code) in departments {
        tx.execute(
            "INSERT INTO departments(name, code, created_at) VALUES(?, ?, ?)",
            (name, code, &now),
        )?;
    }
    let cse_id: i64 = tx.query_row("SELECT id FROM departments WHERE code = 'CSE'", [], |r| {
        r.get(0)
    })?;
    let it_id: i64 = tx.query_row("SELECT id FROM departments WHERE code = 'IT'", [], |r| {
        r.get(0)
    })?;

    let accounts = [
        ("admin", "admin123", Role::Admin, "System Administrator", "admin@acadboost.edu", "Administration"),
        ("teacher1", "teacher123", Role::Teacher, "Dr. Arvind Upadhyay", "arvind@acadboost.edu", "Computer Science & Engineering"),
        ("teacher2", "teacher123", Role::Teacher, "Prof. Sarah Johnson", "sarah@acadboost.edu", "Information Technology"),
        ("student1", "student123", Role::Student, "Pratham Joshi", "pratham@student.acadboost.edu", "Computer Science & Engineering"),
        ("student2", "student123", Role::Student, "Prakhar Agrawal", "prakhar@student.acadboost.edu", "Computer Science & Engineering"),
        ("student3", "student123", Role::Student, "Alice Smith", "alice@student.acadboost.edu", "Information Technology"),
    ];
    for (username, password, role, full_name, email, department) in accounts {
        let hash = credentials::hash_password(password)
            .map_err(|e| anyhow::anyhow!("seed hash for {username}: {e}"))?;
        tx.execute(
            "INSERT INTO users(username, password_hash, role, full_name, email, department, created_at, is_active)
             VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
            (username, &hash, role.as_str(), full_name, email, department, &now),
        )?;
    }
    let teacher1: i64 = tx.query_row("SELECT id FROM users WHERE username = 'teacher1'", [], |r| {
        r.get(0)
    })?;
    let teacher2: i64 = tx.query_row("SELECT id FROM users WHERE username = 'teacher2'", [], |r| {
        r.get(0)
    })?;

    let subjects = [
        ("Data Structures", "CS201", cse_id, teacher1, 4, 3),
        ("Algorithms", "CS202", cse_id, teacher1, 4, 4),
        ("Database Management", "CS301", cse_id, teacher1, 3, 5),
        ("Web Development", "IT201", it_id, teacher2, 3, 3),
        ("Software Engineering", "IT301", it_id, teacher2, 4, 5),
    ];
    for (name, code, dept_id, teacher_id, credits, semester) in subjects {
        tx.execute(
            "INSERT INTO subjects(name, code, department_id, teacher_id, credits, semester, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (name, code, dept_id, teacher_id, credits, semester, &now),
        )?;
    }

    // Enroll each demo student in the first three subjects.
    let mut student_stmt = tx.prepare("SELECT id FROM users WHERE role = 'student' ORDER BY id")?;
    let student_ids = student_stmt
        .query_map([], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut subject_stmt = tx.prepare("SELECT id FROM subjects ORDER BY id LIMIT 3")?;
    let subject_ids = subject_stmt
        .query_map([], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for &student_id in &student_ids {
        for &subject_id in &subject_ids {
            tx.execute(
                "INSERT INTO enrollments(student_id, subject_id, enrolled_at) VALUES(?, ?, ?)",
                (student_id, subject_id, &now),
            )?;
        }
    }
    drop(student_stmt);
    drop(subject_stmt);

    tx.commit()?;
    Ok(())
}
