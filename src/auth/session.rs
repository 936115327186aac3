use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::timestamp;
use crate::repo::RepoResult;

/// A live session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub profile_json: Option<String>,
}

/// Create a new session for a user. Returns the session token.
pub fn create_session(
    conn: &Connection,
    user_id: &str,
    hours: u64,
    profile_json: Option<&str>,
    now: DateTime<Utc>,
) -> RepoResult<String> {
    let token = generate_token();
    let hours = i64::try_from(hours).unwrap_or(i64::MAX);
    let expires_at = now
        .checked_add_signed(Duration::hours(hours.min(24 * 365 * 10)))
        .unwrap_or(now);

    conn.execute(
        "INSERT INTO sessions (token, user_id, profile_json, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![token, user_id, profile_json, timestamp(&expires_at)],
    )?;

    Ok(token)
}

/// Look up an unexpired session by token.
pub fn find_session(conn: &Connection, token: &str, now: DateTime<Utc>) -> RepoResult<Option<SessionRecord>> {
    let record = conn
        .query_row(
            "SELECT user_id, profile_json FROM sessions WHERE token = ?1 AND expires_at > ?2",
            params![token, timestamp(&now)],
            |row| {
                Ok(SessionRecord {
                    user_id: row.get(0)?,
                    profile_json: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

pub fn update_session_profile(conn: &Connection, token: &str, profile_json: &str) -> RepoResult<()> {
    conn.execute(
        "UPDATE sessions SET profile_json = ?1 WHERE token = ?2",
        params![profile_json, token],
    )?;
    Ok(())
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> RepoResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> RepoResult<usize> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![timestamp(&now)],
    )?;
    Ok(removed)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
