use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{Post, PostDetail, PostSummary};
use crate::db::{get_timestamp, timestamp};
use crate::render;
use crate::repo::{page_offset, Page, RepoError, RepoResult};

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub contents: String,
    pub author_id: String,
}

#[derive(Debug, Clone)]
pub struct PostChanges {
    pub title: String,
    pub contents: String,
}

const POST_COLUMNS: &str = "p.id, p.uuid, p.title, p.contents, p.contents_html, p.timestamp, p.author_id";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        uuid: row.get(1)?,
        title: row.get(2)?,
        contents: row.get(3)?,
        contents_html: row.get(4)?,
        timestamp: get_timestamp(row, 5)?,
        author_id: row.get(6)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PostSummary> {
    Ok(PostSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        author_id: row.get(2)?,
        author: row.get(3)?,
        timestamp: get_timestamp(row, 4)?,
    })
}

fn require_text(field: &str, value: &str) -> RepoResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

pub struct PostRepository<'c> {
    conn: &'c Connection,
}

impl<'c> PostRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert a post stamped with `now`. The author must exist.
    pub fn create(&self, new: &NewPost, now: DateTime<Utc>) -> RepoResult<Post> {
        let title = require_text("title", &new.title)?;
        let contents = require_text("contents", &new.contents)?;
        let contents_html = render::contents_html(&contents);
        let uuid = uuid::Uuid::now_v7().to_string();

        self.conn.execute(
            "INSERT INTO posts (uuid, title, contents, contents_html, timestamp, author_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![uuid, title, contents, contents_html, timestamp(&now), new.author_id],
        )?;

        Ok(Post {
            id: self.conn.last_insert_rowid(),
            uuid,
            title,
            contents,
            contents_html,
            timestamp: now,
            author_id: new.author_id.clone(),
        })
    }

    pub fn get(&self, id: i64) -> RepoResult<Post> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM posts p WHERE p.id = ?1", POST_COLUMNS),
                params![id],
                post_from_row,
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    pub fn get_detail(&self, id: i64) -> RepoResult<PostDetail> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {}, u.nickname FROM posts p
                     JOIN users u ON u.id = p.author_id
                     WHERE p.id = ?1",
                    POST_COLUMNS
                ),
                params![id],
                |row| {
                    Ok(PostDetail {
                        post: post_from_row(row)?,
                        author: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or(RepoError::NotFound)
    }

    /// Replace title and contents. The timestamp moves to `now`, or stays put
    /// if the clock reads earlier than the stored value.
    pub fn update(&self, id: i64, changes: &PostChanges, now: DateTime<Utc>) -> RepoResult<Post> {
        let existing = self.get(id)?;
        let title = require_text("title", &changes.title)?;
        let contents = require_text("contents", &changes.contents)?;
        let contents_html = render::contents_html(&contents);
        let stamped = now.max(existing.timestamp);

        self.conn.execute(
            "UPDATE posts SET title = ?1, contents = ?2, contents_html = ?3, timestamp = ?4
             WHERE id = ?5",
            params![title, contents, contents_html, timestamp(&stamped), id],
        )?;

        Ok(Post {
            title,
            contents,
            contents_html,
            timestamp: stamped,
            ..existing
        })
    }

    pub fn delete(&self, id: i64) -> RepoResult<()> {
        let rows = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    /// Newest first, ties broken by ascending id. A page past the end is
    /// empty rather than an error.
    pub fn list(&self, page: u32, page_size: u32) -> RepoResult<Page<PostSummary>> {
        if page == 0 || page_size == 0 {
            return Err(RepoError::Validation(
                "page and page size start at 1".into(),
            ));
        }

        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        let total = u64::try_from(total).unwrap_or(0);

        let mut items = Vec::new();
        if let Some(offset) = page_offset(page, page_size).filter(|o| (*o as u64) < total) {
            let mut stmt = self.conn.prepare(
                "SELECT p.id, p.title, p.author_id, u.nickname, p.timestamp
                 FROM posts p
                 JOIN users u ON u.id = p.author_id
                 ORDER BY p.timestamp DESC, p.id ASC
                 LIMIT ?1 OFFSET ?2",
            )?;
            items = stmt
                .query_map(params![page_size, offset], summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
        }

        Ok(Page {
            items,
            total,
            page,
            per_page: page_size,
        })
    }

    pub fn latest_by_author(&self, author_id: &str, limit: u32) -> RepoResult<Vec<PostSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.title, p.author_id, u.nickname, p.timestamp
             FROM posts p
             JOIN users u ON u.id = p.author_id
             WHERE p.author_id = ?1
             ORDER BY p.timestamp DESC, p.id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![author_id, limit], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> RepoResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}
