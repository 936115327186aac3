use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::auth::permissions::Permissions;
use crate::db::models::{Account, AccountKind, DelegatedUser, Role, User};
use crate::db::{get_timestamp, timestamp};
use crate::repo::{RepoError, RepoResult};

#[derive(Debug, Clone)]
pub struct NewLocalUser {
    pub username: String,
    pub password_hash: String,
    pub role_id: i64,
}

/// Profile fields a user may change about themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub nickname: String,
    pub location: String,
    pub about_me: String,
}

const USER_COLUMNS: &str = "u.id, u.username, u.nickname, u.location, u.about_me,
     u.member_since, u.updated_at, u.last_seen,
     r.id, r.name, r.permissions, r.is_default";

fn role_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        permissions: Permissions::from_bits_retain(row.get(offset + 2)?),
        is_default: row.get(offset + 3)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        nickname: row.get(2)?,
        location: row.get(3)?,
        about_me: row.get(4)?,
        member_since: get_timestamp(row, 5)?,
        updated_at: get_timestamp(row, 6)?,
        last_seen: get_timestamp(row, 7)?,
        role: role_from_row(row, 8)?,
    })
}

fn none_if_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub struct UserRepository<'c> {
    conn: &'c Connection,
}

impl<'c> UserRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // --- Roles ---

    pub fn role_by_name(&self, name: &str) -> RepoResult<Role> {
        self.conn
            .query_row(
                "SELECT id, name, permissions, is_default FROM roles WHERE name = ?1",
                params![name],
                |row| role_from_row(row, 0),
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    pub fn default_role(&self) -> RepoResult<Role> {
        self.conn
            .query_row(
                "SELECT id, name, permissions, is_default FROM roles WHERE is_default = 1
                 ORDER BY id LIMIT 1",
                [],
                |row| role_from_row(row, 0),
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    // --- Local accounts ---

    pub fn create_local(&self, new: &NewLocalUser, now: DateTime<Utc>) -> RepoResult<User> {
        let username = none_if_blank(&new.username)
            .ok_or_else(|| RepoError::Validation("username must not be empty".into()))?;
        let id = uuid::Uuid::now_v7().to_string();
        let stamp = timestamp(&now);

        self.conn.execute(
            "INSERT INTO users (id, kind, username, nickname, role_id, password_hash,
                                member_since, updated_at, last_seen)
             VALUES (?1, 'local', ?2, ?2, ?3, ?4, ?5, ?5, ?5)",
            params![id, username, new.role_id, new.password_hash, stamp],
        )?;

        self.get_local(&id)
    }

    pub fn get_local(&self, id: &str) -> RepoResult<User> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM users u JOIN roles r ON r.id = u.role_id
                     WHERE u.id = ?1 AND u.kind = 'local'",
                    USER_COLUMNS
                ),
                params![id],
                user_from_row,
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    /// The user and stored password hash for a login attempt.
    pub fn local_credentials(&self, username: &str) -> RepoResult<Option<(User, String)>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, u.password_hash FROM users u JOIN roles r ON r.id = u.role_id
                     WHERE u.username = ?1 AND u.kind = 'local'",
                    USER_COLUMNS
                ),
                params![username],
                |row| {
                    let hash: Option<String> = row.get(12)?;
                    Ok((user_from_row(row)?, hash))
                },
            )
            .optional()?;

        Ok(found.and_then(|(user, hash)| hash.map(|h| (user, h))))
    }

    pub fn update_local_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let nickname = none_if_blank(&update.nickname)
            .ok_or_else(|| RepoError::Validation("nickname must not be empty".into()))?;
        let rows = self.conn.execute(
            "UPDATE users SET nickname = ?1, location = ?2, about_me = ?3, updated_at = ?4
             WHERE id = ?5 AND kind = 'local'",
            params![
                nickname,
                none_if_blank(&update.location),
                none_if_blank(&update.about_me),
                timestamp(&now),
                id
            ],
        )?;
        if rows == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, id: &str, now: DateTime<Utc>) -> RepoResult<()> {
        self.conn.execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![timestamp(&now), id],
        )?;
        Ok(())
    }

    // --- Delegated accounts ---

    /// Insert or refresh the local mirror of a provider account.
    pub fn upsert_delegated(&self, user: &DelegatedUser, now: DateTime<Utc>) -> RepoResult<()> {
        let stamp = timestamp(&now);
        self.conn.execute(
            "INSERT INTO users (id, kind, email, nickname, member_since, updated_at, last_seen)
             VALUES (?1, 'delegated', ?2, ?3, ?4, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
               email = excluded.email,
               nickname = excluded.nickname,
               last_seen = excluded.last_seen
             WHERE users.kind = 'delegated'",
            params![user.id, user.email, user.nickname, stamp],
        )?;
        Ok(())
    }

    pub fn get_delegated(&self, id: &str) -> RepoResult<DelegatedUser> {
        self.conn
            .query_row(
                "SELECT id, email, nickname FROM users WHERE id = ?1 AND kind = 'delegated'",
                params![id],
                |row| {
                    Ok(DelegatedUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        nickname: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    pub fn set_nickname(&self, id: &str, nickname: &str, now: DateTime<Utc>) -> RepoResult<()> {
        let nickname = none_if_blank(nickname)
            .ok_or_else(|| RepoError::Validation("nickname must not be empty".into()))?;
        let rows = self.conn.execute(
            "UPDATE users SET nickname = ?1, updated_at = ?2 WHERE id = ?3",
            params![nickname, timestamp(&now), id],
        )?;
        if rows == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    // --- Either kind ---

    pub fn account(&self, id: &str) -> RepoResult<Account> {
        let found = self
            .conn
            .query_row(
                "SELECT id, kind, nickname FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let (id, kind, nickname) = found.ok_or(RepoError::NotFound)?;
        let kind = AccountKind::parse(&kind)
            .ok_or_else(|| RepoError::Validation(format!("unknown account kind {}", kind)))?;
        Ok(Account { id, kind, nickname })
    }

    pub fn ids(&self, kind: AccountKind) -> RepoResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM users WHERE kind = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![kind.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn count(&self, kind: AccountKind) -> RepoResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
