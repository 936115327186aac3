use askama::Template;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::{Identity, Permissions};
use crate::extractors::{clear_flash_cookie, flash_cookie};

/// Wrapper to render askama templates as axum responses.
///
/// Every rendered page has shown the pending flash message, if any, so the
/// flash cookie is cleared along with it.
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
                    (header::SET_COOKIE, clear_flash_cookie()),
                ],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Signed-in user shown in the navigation bar.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub id: String,
    pub name: String,
    pub can_write: bool,
}

impl Viewer {
    pub fn of(identity: &Identity) -> Self {
        Self {
            id: identity.user_id.clone(),
            name: identity.display_name.clone(),
            can_write: identity.can(Permissions::WRITE),
        }
    }
}

/// 303 to `to`, leaving `message` for the next page.
pub fn redirect_with_flash(to: &str, message: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, to.to_string()),
            (header::SET_COOKIE, flash_cookie(message)),
        ],
    )
        .into_response()
}

pub async fn index() -> Redirect {
    Redirect::to("/posts/")
}
