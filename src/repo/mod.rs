// Repositories: stateless views over a borrowed connection. Writes go
// through a `UnitOfWork`, reads can use any pooled connection.
pub mod follows;
pub mod posts;
pub mod users;

use rusqlite::ErrorCode;
use thiserror::Error;

pub use follows::FollowRepository;
pub use posts::{NewPost, PostChanges, PostRepository};
pub use users::UserRepository;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("SQL error: {0}")]
    Sql(rusqlite::Error),
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => RepoError::NotFound,
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == ErrorCode::ConstraintViolation =>
            {
                RepoError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            other => RepoError::Sql(other),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// One window of an ordered result set. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u32 {
        let per_page = u64::from(self.per_page.max(1));
        u32::try_from(self.total.div_ceil(per_page)).unwrap_or(u32::MAX)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn prev_num(&self) -> Option<u32> {
        self.has_prev().then(|| self.page - 1)
    }

    pub fn next_num(&self) -> Option<u32> {
        self.has_next().then(|| self.page + 1)
    }

    /// Page numbers for a pager: the edges plus a window around the current
    /// page, with `None` marking elided runs.
    pub fn iter_pages(&self, edge: u32, around: u32) -> Vec<Option<u32>> {
        let pages = self.pages();
        let mut out = Vec::new();
        let mut last = 0;
        for n in 1..=pages {
            let near_edge = n <= edge || n > pages.saturating_sub(edge);
            let near_current = n + around >= self.page && n <= self.page + around;
            if near_edge || near_current {
                if last + 1 != n {
                    out.push(None);
                }
                out.push(Some(n));
                last = n;
            }
        }
        out
    }
}

/// SQL offset for a 1-indexed page, or `None` when it cannot be represented.
pub(crate) fn page_offset(page: u32, per_page: u32) -> Option<i64> {
    i64::from(page.checked_sub(1)?).checked_mul(i64::from(per_page))
}
