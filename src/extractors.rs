use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap};
use axum::http::request::Parts;

use crate::auth::Identity;
use crate::error::AppError;
use crate::state::AppState;

pub const FLASH_COOKIE: &str = "folio_flash";

/// The signed-in caller. Rejects with `Unauthenticated` (a redirect to the
/// login page) when the session cookie is missing, unknown or expired.
#[derive(Debug, Clone)]
pub struct CurrentIdentity {
    pub identity: Identity,
    pub session_token: String,
}

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, &state.config.auth.cookie_name)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(AppError::Unauthenticated)?;

        let identity = state
            .identity
            .current_identity(&token)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        Ok(CurrentIdentity {
            identity,
            session_token: token,
        })
    }
}

/// Optional identity extractor; never rejects.
pub struct MaybeIdentity(pub Option<CurrentIdentity>);

impl FromRequestParts<AppState> for MaybeIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentIdentity::from_request_parts(parts, state).await {
            Ok(current) => Ok(MaybeIdentity(Some(current))),
            Err(AppError::Unauthenticated) => Ok(MaybeIdentity(None)),
            Err(e) => {
                tracing::warn!("Session lookup failed: {}", e);
                Ok(MaybeIdentity(None))
            }
        }
    }
}

/// One-shot message left by the previous request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flash(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Flash {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Flash(cookie_value(&parts.headers, FLASH_COOKIE).and_then(decode_flash)))
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

// -- Cookie helpers --

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours.saturating_mul(3600);
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

pub fn flash_cookie(message: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=60",
        FLASH_COOKIE, encoded
    )
}

pub fn clear_flash_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", FLASH_COOKIE)
}

fn decode_flash(raw: &str) -> Option<String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(message, _)| message.into_owned())
        .filter(|message| !message.is_empty())
}
