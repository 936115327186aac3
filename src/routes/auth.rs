use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::auth::Credentials;
use crate::error::{AppError, AppResult};
use crate::extractors::{
    clear_session_cookie, cookie_value, session_cookie, Flash, MaybeIdentity,
};
use crate::routes::home::{redirect_with_flash, Html, Viewer};
use crate::state::AppState;

pub const SIGN_IN_FAILED: &str = "Sign-in failed. Please try again.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_page).post(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
}

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub username: String,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn signed_in(state: &AppState, token: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/posts/".to_string()),
            (
                header::SET_COOKIE,
                session_cookie(
                    &state.config.auth.cookie_name,
                    token,
                    state.config.auth.session_hours,
                ),
            ),
        ],
    )
        .into_response()
}

/// GET /auth/login: the local form, or a redirect to the identity provider
pub async fn login_page(
    State(state): State<AppState>,
    current: MaybeIdentity,
    Flash(flash): Flash,
) -> Response {
    if current.0.is_some() {
        return Redirect::to("/posts/").into_response();
    }
    if let Some(url) = state.identity.login_redirect() {
        return Redirect::to(&url).into_response();
    }
    Html(LoginTemplate {
        viewer: None,
        flash,
        username: String::new(),
        error: None,
    })
    .into_response()
}

/// POST /auth/login: username and password
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let credentials = Credentials::Password {
        username: form.username.clone(),
        password: form.password,
    };
    match state.identity.sign_in(credentials).await? {
        Some(token) => Ok(signed_in(&state, &token)),
        None => {
            let page = Html(LoginTemplate {
                viewer: None,
                flash: None,
                username: form.username,
                error: Some("Invalid username or password.".to_string()),
            });
            Ok((StatusCode::UNAUTHORIZED, page).into_response())
        }
    }
}

/// GET /auth/callback: the provider sends the browser back with a code
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<Response> {
    if let Some(error) = query.error {
        tracing::warn!(
            "Identity provider returned {}: {}",
            error,
            query.error_description.unwrap_or_default()
        );
        return Ok(redirect_with_flash("/posts/", SIGN_IN_FAILED));
    }
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing authorization code".into()))?;

    match state.identity.sign_in(Credentials::AuthorizationCode(code)).await {
        Ok(Some(token)) => Ok(signed_in(&state, &token)),
        Ok(None) => Ok(redirect_with_flash("/posts/", SIGN_IN_FAILED)),
        Err(e @ AppError::BadRequest(_)) => Err(e),
        Err(e) => {
            tracing::warn!("Sign-in through the identity provider failed: {}", e);
            Ok(redirect_with_flash("/posts/", SIGN_IN_FAILED))
        }
    }
}

/// POST /auth/logout: delete the session and clear the cookie
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = cookie_value(&headers, cookie_name).filter(|t| !t.is_empty()) {
        if let Err(e) = state.identity.sign_out(token).await {
            tracing::warn!("Failed to delete session: {}", e);
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, "/posts/".to_string()),
            (header::SET_COOKIE, clear_session_cookie(cookie_name)),
        ],
    )
        .into_response())
}
