use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::permissions::Permissions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Local,
    Delegated,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Local => "local",
            AccountKind::Delegated => "delegated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "local" => Some(AccountKind::Local),
            "delegated" => Some(AccountKind::Delegated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub permissions: Permissions,
    pub is_default: bool,
}

/// A locally registered account. Always carries exactly one role.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub nickname: String,
    pub role: Role,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub member_since: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// An account mirrored from the identity provider. Only the fields needed to
/// attribute posts live here; the rest of the profile stays with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedUser {
    pub id: String,
    pub email: String,
    pub nickname: String,
}

/// Either variant, reduced to what pages need to show an author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub kind: AccountKind,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub uuid: String,
    pub title: String,
    pub contents: String,
    pub contents_html: String,
    pub timestamp: DateTime<Utc>,
    pub author_id: String,
}

/// A post joined with its author's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    pub post: Post,
    pub author: String,
}

/// One row of the paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub author_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}
