use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::timestamp;
use crate::repo::{RepoError, RepoResult};

/// The directed follower graph between accounts.
pub struct FollowRepository<'c> {
    conn: &'c Connection,
}

impl<'c> FollowRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Add the edge `follower -> followed`. Returns `false` when the edge was
    /// already there.
    pub fn follow(&self, follower_id: &str, followed_id: &str, now: DateTime<Utc>) -> RepoResult<bool> {
        if follower_id == followed_id {
            return Err(RepoError::InvalidOperation(
                "an account cannot follow itself".into(),
            ));
        }

        let inserted = self.conn.execute(
            "INSERT INTO follows (follower_id, followed_id, timestamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(follower_id, followed_id) DO NOTHING",
            params![follower_id, followed_id, timestamp(&now)],
        )?;
        Ok(inserted > 0)
    }

    /// Remove the edge if present. Returns whether anything was removed.
    pub fn unfollow(&self, follower_id: &str, followed_id: &str) -> RepoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
        )?;
        Ok(removed > 0)
    }

    pub fn is_following(&self, follower_id: &str, followed_id: &str) -> RepoResult<bool> {
        let found: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    pub fn follower_count(&self, user_id: &str) -> RepoResult<u64> {
        self.count_where("followed_id", user_id)
    }

    pub fn followed_count(&self, user_id: &str) -> RepoResult<u64> {
        self.count_where("follower_id", user_id)
    }

    pub fn count(&self) -> RepoResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM follows", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn count_where(&self, column: &'static str, user_id: &str) -> RepoResult<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM follows WHERE {} = ?1", column),
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
