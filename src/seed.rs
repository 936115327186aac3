//! `folio seed`: fill a database with accounts, sample posts and follow edges.

use std::path::Path;

use anyhow::Context;
use chrono::{Duration, Utc};
use fake::faker::lorem::en::{Paragraphs, Sentence};
use fake::Fake;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

use crate::auth::directory::{DirectoryUser, HttpDirectory, UserDirectory};
use crate::auth::local::hash_password;
use crate::config::{AuthBackend, Config, SeedArgs};
use crate::db::models::{AccountKind, DelegatedUser};
use crate::db::{self, UnitOfWork};
use crate::error::AppError;
use crate::repo::users::NewLocalUser;
use crate::repo::{FollowRepository, NewPost, PostRepository, UserRepository};
use crate::state::DbPool;

#[derive(Debug, Clone, Deserialize)]
pub struct SeedFile {
    pub users: Vec<SeedUser>,
}

/// One local account. The role is named explicitly and must already exist.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub users: usize,
    pub posts: usize,
    pub follows: usize,
}

pub async fn run(config: &Config, pool: &DbPool, args: &SeedArgs) -> anyhow::Result<()> {
    if args.reset {
        db::reset(pool)?;
    }

    let users = match config.auth.backend {
        AuthBackend::Local => match args.users {
            Some(ref path) => {
                let file = load_seed_file(path)?;
                seed_local_users(pool, &file.users, bcrypt::DEFAULT_COST)?
            }
            None => 0,
        },
        AuthBackend::Delegated => {
            if args.users.is_some() {
                tracing::warn!("--users is ignored with the delegated backend");
            }
            let directory = HttpDirectory::from_config(&config.delegated)?;
            let listed = directory.list_users().await?;
            sync_delegated_users(pool, &listed)?
        }
    };

    let mut rng = rand::thread_rng();
    let report = SeedReport {
        users,
        posts: seed_posts(pool, args.posts, &mut rng)?,
        follows: if args.follows {
            seed_follows(pool, &mut rng)?
        } else {
            0
        },
    };
    tracing::info!(
        "Seeded {} users, {} posts, {} follows",
        report.users,
        report.posts,
        report.follows
    );
    Ok(())
}

pub fn load_seed_file(path: &Path) -> anyhow::Result<SeedFile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Insert every listed user in one unit of work; any failure inserts none.
pub fn seed_local_users(pool: &DbPool, users: &[SeedUser], cost: u32) -> anyhow::Result<usize> {
    let hashed = users
        .iter()
        .map(|u| hash_password(&u.password, cost).map(|hash| (u, hash)))
        .collect::<Result<Vec<_>, AppError>>()?;

    let now = Utc::now();
    UnitOfWork::run(pool, |uow| {
        let repo = UserRepository::new(uow);
        for (user, password_hash) in &hashed {
            let role = repo.role_by_name(&user.role).map_err(|_| {
                AppError::Validation(format!(
                    "user {} names unknown role {:?}",
                    user.username, user.role
                ))
            })?;
            repo.create_local(
                &NewLocalUser {
                    username: user.username.clone(),
                    password_hash: password_hash.clone(),
                    role_id: role.id,
                },
                now,
            )?;
        }
        Ok::<_, AppError>(())
    })?;

    tracing::info!("[seed] {} local users", users.len());
    Ok(users.len())
}

/// Mirror the provider's directory into the local users table.
pub fn sync_delegated_users(pool: &DbPool, listed: &[DirectoryUser]) -> anyhow::Result<usize> {
    let now = Utc::now();
    UnitOfWork::run(pool, |uow| {
        let repo = UserRepository::new(uow);
        for entry in listed {
            repo.upsert_delegated(
                &DelegatedUser {
                    id: entry.local_id().to_string(),
                    email: entry.email.clone(),
                    nickname: entry.nickname.clone(),
                },
                now,
            )?;
        }
        Ok::<_, AppError>(())
    })?;

    tracing::info!("[seed] {} delegated users", listed.len());
    Ok(listed.len())
}

fn all_account_ids(pool: &DbPool) -> anyhow::Result<Vec<String>> {
    let conn = pool.get()?;
    let repo = UserRepository::new(&conn);
    let mut ids = repo.ids(AccountKind::Local)?;
    ids.extend(repo.ids(AccountKind::Delegated)?);
    Ok(ids)
}

/// A lorem title of two to six words and one to four paragraphs of body.
fn sample_post<R: Rng>(rng: &mut R) -> (String, String) {
    let title: String = Sentence(2..7).fake_with_rng(rng);
    let paragraphs: Vec<String> = Paragraphs(1..5).fake_with_rng(rng);
    (
        title.trim_end_matches('.').to_string(),
        paragraphs.join("\n\n"),
    )
}

/// Add `count` posts by random authors, spread over the past month. Each post
/// is its own unit of work; failed inserts are logged and skipped.
pub fn seed_posts<R: Rng>(pool: &DbPool, count: u32, rng: &mut R) -> anyhow::Result<usize> {
    if count == 0 {
        return Ok(0);
    }
    let authors = all_account_ids(pool)?;
    if authors.is_empty() {
        tracing::warn!("[seed] no accounts to attribute posts to");
        return Ok(0);
    }

    let now = Utc::now();
    let mut created = 0;
    for _ in 0..count {
        let Some(author_id) = authors.choose(rng).cloned() else {
            break;
        };
        let (title, contents) = sample_post(rng);
        let at = now - Duration::minutes(rng.gen_range(0..60 * 24 * 30));

        let result = UnitOfWork::run(pool, |uow| {
            Ok::<_, AppError>(PostRepository::new(uow).create(
                &NewPost {
                    title,
                    contents,
                    author_id,
                },
                at,
            )?)
        });
        match result {
            Ok(_) => created += 1,
            Err(e) => tracing::warn!("[seed] skipped a post: {}", e),
        }
    }

    tracing::info!("[seed] {} posts", created);
    Ok(created)
}

/// Each account follows up to `n / 2 + 1` random others. Self follows and
/// edges that already exist are skipped.
pub fn seed_follows<R: Rng>(pool: &DbPool, rng: &mut R) -> anyhow::Result<usize> {
    let accounts = all_account_ids(pool)?;
    let per_account = accounts.len() / 2 + 1;

    let now = Utc::now();
    let mut created = 0;
    for follower in &accounts {
        for _ in 0..per_account {
            let Some(followed) = accounts.choose(rng) else {
                break;
            };
            if followed == follower {
                continue;
            }
            let result = UnitOfWork::run(pool, |uow| {
                Ok::<_, AppError>(FollowRepository::new(uow).follow(follower, followed, now)?)
            });
            match result {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("[seed] skipped a follow: {}", e),
            }
        }
    }

    tracing::info!("[seed] {} follows", created);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_pool;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seed_user(username: &str, role: &str) -> SeedUser {
        SeedUser {
            username: username.into(),
            password: "pw".into(),
            role: role.into(),
        }
    }

    #[test]
    fn roles_come_from_the_seed_file_not_the_username() {
        let (pool, _tmp) = test_pool();
        let users = vec![seed_user("admin-lookalike", "user"), seed_user("carol", "admin")];
        assert_eq!(seed_local_users(&pool, &users, 4).unwrap(), 2);

        let conn = pool.get().unwrap();
        let repo = UserRepository::new(&conn);
        let (lookalike, _) = repo.local_credentials("admin-lookalike").unwrap().unwrap();
        assert_eq!(lookalike.role.name, "user");
        let (carol, _) = repo.local_credentials("carol").unwrap().unwrap();
        assert_eq!(carol.role.name, "admin");
    }

    #[test]
    fn unknown_role_inserts_nobody() {
        let (pool, _tmp) = test_pool();
        let users = vec![seed_user("alice", "user"), seed_user("bob", "overlord")];
        let err = seed_local_users(&pool, &users, 4).unwrap_err();
        assert!(err.to_string().contains("overlord"));

        let conn = pool.get().unwrap();
        assert_eq!(UserRepository::new(&conn).count(AccountKind::Local).unwrap(), 0);
    }

    #[test]
    fn seed_file_parses() {
        let file: SeedFile = toml::from_str(
            r#"
[[users]]
username = "alice"
password = "pw"
role = "admin"
"#,
        )
        .unwrap();
        assert_eq!(file.users.len(), 1);
        assert_eq!(file.users[0].role, "admin");
    }

    #[test]
    fn posts_and_follows_are_generated() {
        let (pool, _tmp) = test_pool();
        let users = vec![
            seed_user("alice", "user"),
            seed_user("bob", "user"),
            seed_user("carol", "user"),
        ];
        seed_local_users(&pool, &users, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        assert_eq!(seed_posts(&pool, 15, &mut rng).unwrap(), 15);
        let follows = seed_follows(&pool, &mut rng).unwrap();

        let conn = pool.get().unwrap();
        assert_eq!(PostRepository::new(&conn).count().unwrap(), 15);
        assert_eq!(
            FollowRepository::new(&conn).count().unwrap(),
            follows as u64
        );
        assert!(follows <= 6);
    }

    #[test]
    fn sample_posts_have_a_title_and_paragraphs() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let (title, contents) = sample_post(&mut rng);
            let words = title.split_whitespace().count();
            assert!((2..=6).contains(&words), "title {:?}", title);
            assert!(!title.ends_with('.'));
            let paragraphs = contents.split("\n\n").count();
            assert!((1..=4).contains(&paragraphs));
        }
    }

    #[test]
    fn posts_without_accounts_are_skipped() {
        let (pool, _tmp) = test_pool();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(seed_posts(&pool, 5, &mut rng).unwrap(), 0);
    }

    #[test]
    fn delegated_sync_uses_id_after_prefix() {
        let (pool, _tmp) = test_pool();
        let listed = vec![DirectoryUser {
            user_id: "auth0|abc".into(),
            email: "a@example.com".into(),
            nickname: "a".into(),
            user_metadata: None,
            updated_at: None,
            last_login: None,
        }];
        assert_eq!(sync_delegated_users(&pool, &listed).unwrap(), 1);

        let conn = pool.get().unwrap();
        let user = UserRepository::new(&conn).get_delegated("abc").unwrap();
        assert_eq!(user.email, "a@example.com");
    }
}
