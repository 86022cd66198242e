//! Credential store: the only place password material is written or checked.
//!
//! Passwords are stored as salted PBKDF2 PHC strings. The legacy portal this
//! replaces kept unsalted SHA-256 digests; those are not accepted or produced
//! here.

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand_core::OsRng;
use rusqlite::{Connection, OptionalExtension};

use crate::access::Role;
use crate::ipc::error::ApiError;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
}

pub fn hash_password(plain: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn password_matches(plain: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Pbkdf2.verify_password(plain.as_bytes(), &parsed).is_ok()
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: Role,
    full_name: &str,
    email: Option<&str>,
    department: Option<&str>,
) -> Result<i64, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::BadParams("username must not be empty".to_string()));
    }
    if password.is_empty() {
        return Err(ApiError::BadParams("password must not be empty".to_string()));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE username = ?", [username], |r| {
            r.get(0)
        })
        .optional()?;
    if taken.is_some() {
        return Err(ApiError::DuplicateUsername(username.to_string()));
    }

    let hash = hash_password(password)?;
    conn.execute(
        "INSERT INTO users(username, password_hash, role, full_name, email, department, created_at, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        (
            username,
            &hash,
            role.as_str(),
            full_name,
            email,
            department,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Look up an active user and check the password. Every failure mode
/// collapses to `InvalidCredentials` so callers can't probe for usernames.
pub fn verify_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<UserRecord, ApiError> {
    let row: Option<(i64, String, String, String, Option<String>, Option<String>, String)> = conn
        .query_row(
            "SELECT id, username, role, full_name, email, department, password_hash
             FROM users
             WHERE username = ? AND is_active = 1",
            [username],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, username, role, full_name, email, department, stored_hash)) = row else {
        return Err(ApiError::InvalidCredentials);
    };
    if !password_matches(password, &stored_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    let role = Role::parse(&role).ok_or(ApiError::InvalidCredentials)?;
    Ok(UserRecord {
        id,
        username,
        role,
        full_name,
        email,
        department,
    })
}

pub fn change_password(conn: &Connection, user_id: i64, new_plain: &str) -> Result<(), ApiError> {
    if new_plain.is_empty() {
        return Err(ApiError::BadParams("password must not be empty".to_string()));
    }
    let hash = hash_password(new_plain)?;
    let updated = conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (&hash, user_id),
    )?;
    if updated == 0 {
        return Err(ApiError::NotFound("user"));
    }
    Ok(())
}
