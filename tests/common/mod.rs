//! Shared helpers for driving the router in-process.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

use folio::auth::delegated::DelegatedBackend;
use folio::auth::directory::{
    DirectoryError, DirectoryUser, PatchOutcome, UserDirectory, UserInfo, UserMetadata,
};
use folio::auth::local::{hash_password, LocalBackend};
use folio::config::Config;
use folio::db;
use folio::repo::users::{NewLocalUser, ProfileUpdate};
use folio::repo::UserRepository;
use folio::state::{AppState, DbPool};

pub const PER_PAGE: u32 = 5;

pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    _tmp: TempDir,
}

fn test_pool() -> (DbPool, TempDir) {
    let tmp = TempDir::new().unwrap();
    let pool = db::create_pool(&tmp.path().join("test.db")).expect("Failed to create test database");
    db::run_migrations(&pool).expect("Failed to run migrations");
    (pool, tmp)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.posts.per_page = PER_PAGE;
    config
}

impl TestApp {
    pub fn local() -> Self {
        let (pool, tmp) = test_pool();
        let config = test_config();
        let identity = Arc::new(LocalBackend::new(pool.clone(), config.auth.session_hours));
        let state = AppState {
            db: pool.clone(),
            config,
            identity,
        };
        Self {
            router: folio::app(state),
            pool,
            _tmp: tmp,
        }
    }

    pub fn delegated(directory: Arc<FakeDirectory>) -> Self {
        let (pool, tmp) = test_pool();
        let config = test_config();
        let identity = Arc::new(DelegatedBackend::new(
            pool.clone(),
            directory,
            "https://tenant.example.com/authorize?client_id=test".to_string(),
            "auth0".to_string(),
            config.auth.session_hours,
        ));
        let state = AppState {
            db: pool.clone(),
            config,
            identity,
        };
        Self {
            router: folio::app(state),
            pool,
            _tmp: tmp,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a local account and return its id.
    pub fn add_local_user(&self, username: &str, password: &str, role: &str) -> String {
        let conn = self.pool.get().unwrap();
        let repo = UserRepository::new(&conn);
        let role = repo.role_by_name(role).unwrap();
        repo.create_local(
            &NewLocalUser {
                username: username.to_string(),
                password_hash: hash_password(password, 4).unwrap(),
                role_id: role.id,
            },
            Utc::now(),
        )
        .unwrap()
        .id
    }

    /// Sign in through the login form and return the `Cookie` header value.
    pub async fn login(&self, username: &str, password: &str) -> String {
        let response = self
            .send(post_form(
                "/auth/login",
                None,
                &[("username", username), ("password", password)],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "login failed");
        session_cookie(&response).expect("no session cookie")
    }

    pub async fn callback(&self, code: &str) -> String {
        let uri = format!("/auth/callback?code={}", encode(code));
        let response = self.send(get(&uri, None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "callback failed");
        session_cookie(&response).expect("no session cookie")
    }
}

// -- Requests --

pub fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, cookie: Option<&str>, fields: &[(&str, &str)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn delete(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("DELETE").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

// -- Responses --

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn set_cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| value.to_string())
        })
}

/// `folio_session=<token>`, ready to send back as a `Cookie` header.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    set_cookie_value(response, "folio_session")
        .filter(|v| !v.is_empty())
        .map(|token| format!("folio_session={}", token))
}

/// The flash message a response leaves for the next page.
pub fn flash(response: &Response<Body>) -> Option<String> {
    let raw = set_cookie_value(response, "folio_flash")?;
    url::form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(message, _)| message.into_owned())
        .filter(|m| !m.is_empty())
}

// -- Identity provider fake --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchMode {
    Accept,
    Reject(String),
    Unavailable,
}

/// In-memory directory. Authorization codes are the user's email address.
pub struct FakeDirectory {
    pub users: Mutex<Vec<DirectoryUser>>,
    pub patched: Mutex<Vec<String>>,
    pub mode: Mutex<PatchMode>,
}

impl FakeDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(users),
            patched: Mutex::new(Vec::new()),
            mode: Mutex::new(PatchMode::Accept),
        })
    }

    pub fn set_mode(&self, mode: PatchMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

pub fn directory_user(id: &str, email: &str, nickname: &str, location: &str) -> DirectoryUser {
    DirectoryUser {
        user_id: format!("auth0|{}", id),
        email: email.to_string(),
        nickname: nickname.to_string(),
        user_metadata: Some(UserMetadata {
            location: Some(location.to_string()),
            about_me: None,
        }),
        updated_at: Some("2024-03-01T10:00:00.000Z".to_string()),
        last_login: Some("2024-03-02T10:00:00.000Z".to_string()),
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn patch_user(
        &self,
        provider_id: &str,
        update: &ProfileUpdate,
    ) -> Result<PatchOutcome, DirectoryError> {
        self.patched.lock().unwrap().push(provider_id.to_string());
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            PatchMode::Reject(message) => Ok(PatchOutcome::Rejected(message)),
            PatchMode::Unavailable => Err(DirectoryError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            }),
            PatchMode::Accept => {
                let mut users = self.users.lock().unwrap();
                let entry = users
                    .iter_mut()
                    .find(|u| u.user_id == provider_id)
                    .ok_or(DirectoryError::Status {
                        status: 404,
                        message: "The user does not exist.".to_string(),
                    })?;
                entry.nickname = update.nickname.clone();
                entry.user_metadata = Some(UserMetadata {
                    location: Some(update.location.clone()),
                    about_me: Some(update.about_me.clone()),
                });
                Ok(PatchOutcome::Accepted(Box::new(entry.clone())))
            }
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String, DirectoryError> {
        let known = self.users.lock().unwrap().iter().any(|u| u.email == code);
        if known {
            Ok(format!("token:{}", code))
        } else {
            Err(DirectoryError::Status {
                status: 403,
                message: "invalid_grant".to_string(),
            })
        }
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, DirectoryError> {
        let email = access_token.trim_start_matches("token:");
        let users = self.users.lock().unwrap();
        let entry = users
            .iter()
            .find(|u| u.email == email)
            .ok_or(DirectoryError::Status {
                status: 401,
                message: "invalid token".to_string(),
            })?;
        Ok(UserInfo {
            sub: entry.user_id.clone(),
            email: entry.email.clone(),
            nickname: Some(entry.nickname.clone()),
        })
    }
}
