pub mod models;

use std::ops::Deref;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_accounts",
        include_str!("../../migrations/001_accounts.sql"),
    ),
    ("002_posts", include_str!("../../migrations/002_posts.sql")),
    (
        "003_follows",
        include_str!("../../migrations/003_follows.sql"),
    ),
];

fn configure(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per connection, so every pooled connection runs them.
    let manager = SqliteConnectionManager::file(db_path).with_init(configure);
    let pool = Pool::builder().max_size(8).build(manager)?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Removes every account, post, follow edge and session. Roles survive.
pub fn reset(pool: &DbPool) -> anyhow::Result<()> {
    let uow = UnitOfWork::begin(pool)?;
    uow.execute_batch(
        "DELETE FROM follows;
         DELETE FROM posts;
         DELETE FROM sessions;
         DELETE FROM users;",
    )?;
    uow.commit()?;
    tracing::info!("Database reset");
    Ok(())
}

/// One request's worth of writes.
///
/// Opens an immediate transaction on a pooled connection. `commit` consumes
/// the unit; dropping it uncommitted rolls everything back, so a unit is
/// finished exactly once.
pub struct UnitOfWork {
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl UnitOfWork {
    pub fn begin(pool: &DbPool) -> Result<Self, crate::error::AppError> {
        let conn = pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn commit(mut self) -> rusqlite::Result<()> {
        // A failed COMMIT leaves the transaction open; Drop rolls it back.
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> rusqlite::Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")
    }

    /// Run `work` inside a fresh unit, committing on `Ok` and rolling back on `Err`.
    pub fn run<T, E, F>(pool: &DbPool, work: F) -> Result<T, E>
    where
        F: FnOnce(&UnitOfWork) -> Result<T, E>,
        E: From<crate::error::AppError> + From<rusqlite::Error>,
    {
        let uow = UnitOfWork::begin(pool)?;
        match work(&uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback() {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

impl Deref for UnitOfWork {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!("Rollback of abandoned unit of work failed: {}", e);
            }
        }
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that text
/// ordering matches chronological ordering.
pub fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}


#[cfg(test)]
mod tests {
    use super::testing::test_pool;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn migrations_run_successfully() {
        let (pool, _tmp) = test_pool();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in ["roles", "users", "sessions", "posts", "follows"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let (pool, _tmp) = test_pool();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let roles: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, 2);
    }

    #[test]
    fn local_user_without_role_is_rejected() {
        let (pool, _tmp) = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO users (id, kind, username, nickname, member_since, updated_at, last_seen)
             VALUES ('u1', 'local', 'alice', 'alice', 'x', 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn foreign_keys_enforced() {
        let (pool, _tmp) = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO posts (uuid, title, contents, contents_html, timestamp, author_id)
             VALUES ('p1', 't', 'c', '<p>c</p>', 'x', 'nobody')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn dropped_unit_of_work_rolls_back() {
        let (pool, _tmp) = test_pool();
        {
            let uow = UnitOfWork::begin(&pool).unwrap();
            uow.execute("DELETE FROM roles", []).unwrap();
        }
        let conn = pool.get().unwrap();
        let roles: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, 2);
    }

    #[test]
    fn run_commits_only_on_success() {
        let (pool, _tmp) = test_pool();

        let failed: Result<(), crate::error::AppError> = UnitOfWork::run(&pool, |uow| {
            uow.execute("DELETE FROM roles WHERE name = 'admin'", [])?;
            Err(crate::error::AppError::Internal("abort".into()))
        });
        assert!(failed.is_err());

        let conn = pool.get().unwrap();
        let roles: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, 2);
        drop(conn);

        let ok: Result<(), crate::error::AppError> = UnitOfWork::run(&pool, |uow| {
            uow.execute("DELETE FROM roles WHERE name = 'admin'", [])?;
            Ok(())
        });
        assert!(ok.is_ok());

        let conn = pool.get().unwrap();
        let roles: i64 = conn
            .query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(roles, 1);
    }

    #[test]
    fn timestamps_sort_chronologically_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = early + chrono::Duration::microseconds(1);
        assert!(timestamp(&early) < timestamp(&later));
        assert_eq!(parse_timestamp(&timestamp(&later)), Some(later));
    }
}
