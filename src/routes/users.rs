use askama::Template;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::{Identity, Permissions, Profile, ProfileOutcome};
use crate::db::UnitOfWork;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentIdentity, Flash};
use crate::repo::users::ProfileUpdate;
use crate::repo::{FollowRepository, PostRepository, UserRepository};
use crate::routes::display_time;
use crate::routes::home::{redirect_with_flash, Html, Viewer};
use crate::routes::posts::PostRow;
use crate::state::AppState;

pub const PROFILE_UPDATED: &str = "Your profile was successfully updated.";
pub const PROFILE_FAILED: &str = "An error occurred. Your profile could not be updated.";
pub const FOLLOW_FAILED: &str = "An error occurred. You could not follow this user.";
pub const UNFOLLOW_FAILED: &str = "An error occurred. You could not unfollow this user.";

const NICKNAME_MAX: usize = 64;
const LOCATION_MAX: usize = 64;
const ABOUT_ME_MAX: usize = 1000;
const LATEST_POSTS: u32 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{id}", get(show_user))
        .route("/users/{id}/edit", get(edit_user).post(update_user))
        .route("/users/{id}/follow", post(follow))
        .route("/users/{id}/unfollow", post(unfollow))
}

pub struct ProfileView {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub member_since: Option<String>,
    pub last_updated: Option<String>,
    pub last_seen: Option<String>,
}

impl From<Profile> for ProfileView {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            name: profile.display_name,
            location: profile.location,
            about_me: profile.about_me,
            member_since: profile.member_since.as_ref().map(display_time),
            last_updated: profile.last_updated.as_ref().map(display_time),
            last_seen: profile.last_seen.as_ref().map(display_time),
        }
    }
}

#[derive(Template)]
#[template(path = "pages/user.html")]
pub struct UserTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub profile: ProfileView,
    pub followers: u64,
    pub following: u64,
    pub is_self: bool,
    pub is_following: bool,
    pub can_follow: bool,
    pub posts: Vec<PostRow>,
}

#[derive(Template)]
#[template(path = "forms/user.html")]
pub struct UserFormTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub user_id: String,
    pub nickname: String,
    pub location: String,
    pub about_me: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
}

impl ProfileForm {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let nickname = self.nickname.trim().chars().count();
        if nickname == 0 {
            errors.push("Nickname is required.".to_string());
        } else if nickname > NICKNAME_MAX {
            errors.push(format!(
                "Nickname must be at most {} characters.",
                NICKNAME_MAX
            ));
        }
        if self.location.trim().chars().count() > LOCATION_MAX {
            errors.push(format!(
                "Location must be at most {} characters.",
                LOCATION_MAX
            ));
        }
        if self.about_me.trim().chars().count() > ABOUT_ME_MAX {
            errors.push(format!(
                "About me must be at most {} characters.",
                ABOUT_ME_MAX
            ));
        }
        errors
    }

    fn into_update(self) -> ProfileUpdate {
        ProfileUpdate {
            nickname: self.nickname.trim().to_string(),
            location: self.location.trim().to_string(),
            about_me: self.about_me.trim().to_string(),
        }
    }
}

fn require_self(identity: &Identity, user_id: &str) -> AppResult<()> {
    if identity.user_id != user_id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// GET /users/{id}: profile, follower counts and latest posts
pub async fn show_user(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Flash(flash): Flash,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let identity = current.identity;
    let profile = state.identity.profile(&id).await?;

    let (followers, following, is_following, posts) = {
        let conn = state.db.get()?;
        let follows = FollowRepository::new(&conn);
        (
            follows.follower_count(&id)?,
            follows.followed_count(&id)?,
            follows.is_following(&identity.user_id, &id)?,
            PostRepository::new(&conn).latest_by_author(&id, LATEST_POSTS)?,
        )
    };

    let is_self = identity.user_id == id;
    Ok(Html(UserTemplate {
        viewer: Some(Viewer::of(&identity)),
        flash,
        profile: profile.into(),
        followers,
        following,
        is_self,
        is_following,
        can_follow: !is_self && identity.can(Permissions::FOLLOW),
        posts: posts.into_iter().map(PostRow::from).collect(),
    })
    .into_response())
}

/// GET /users/{id}/edit
pub async fn edit_user(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Flash(flash): Flash,
    Path(id): Path<String>,
) -> AppResult<Response> {
    require_self(&current.identity, &id)?;
    let values = state.identity.editable_profile(&current.identity).await?;

    Ok(Html(UserFormTemplate {
        viewer: Some(Viewer::of(&current.identity)),
        flash,
        user_id: id,
        nickname: values.nickname,
        location: values.location,
        about_me: values.about_me,
        errors: Vec::new(),
    })
    .into_response())
}

/// POST /users/{id}/edit
pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Path(id): Path<String>,
    Form(form): Form<ProfileForm>,
) -> AppResult<Response> {
    require_self(&current.identity, &id)?;

    let errors = form.validate();
    if !errors.is_empty() {
        let page = Html(UserFormTemplate {
            viewer: Some(Viewer::of(&current.identity)),
            flash: None,
            user_id: id,
            nickname: form.nickname,
            location: form.location,
            about_me: form.about_me,
            errors,
        });
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }

    let update = form.into_update();
    let outcome = state
        .identity
        .update_profile(&current.identity, &current.session_token, &update)
        .await;

    Ok(match outcome {
        Ok(ProfileOutcome::Updated) => {
            redirect_with_flash(&format!("/users/{}", id), PROFILE_UPDATED)
        }
        Ok(ProfileOutcome::Rejected(message)) => {
            redirect_with_flash(&format!("/users/{}/edit", id), &message)
        }
        Err(e) => {
            tracing::error!("Updating profile of {} failed: {}", id, e);
            redirect_with_flash(&format!("/users/{}/edit", id), PROFILE_FAILED)
        }
    })
}

/// POST /users/{id}/follow
pub async fn follow(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let identity = current.identity;
    if !identity.can(Permissions::FOLLOW) {
        return Err(AppError::Forbidden);
    }

    let result = UnitOfWork::run(&state.db, |uow| {
        UserRepository::new(uow).account(&id)?;
        Ok::<_, AppError>(FollowRepository::new(uow).follow(&identity.user_id, &id, Utc::now())?)
    });

    let location = format!("/users/{}", id);
    match result {
        Ok(added) => {
            if added {
                tracing::info!("{} now follows {}", identity.user_id, id);
            }
            Ok(axum::response::Redirect::to(&location).into_response())
        }
        Err(AppError::NotFound) => Err(AppError::NotFound),
        Err(e) => {
            tracing::error!("{} could not follow {}: {}", identity.user_id, id, e);
            Ok(redirect_with_flash(&location, FOLLOW_FAILED))
        }
    }
}

/// POST /users/{id}/unfollow
pub async fn unfollow(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let identity = current.identity;
    let result = UnitOfWork::run(&state.db, |uow| {
        Ok::<_, AppError>(FollowRepository::new(uow).unfollow(&identity.user_id, &id)?)
    });

    let location = format!("/users/{}", id);
    match result {
        Ok(_) => Ok(axum::response::Redirect::to(&location).into_response()),
        Err(e) => {
            tracing::error!("{} could not unfollow {}: {}", identity.user_id, id, e);
            Ok(redirect_with_flash(&location, UNFOLLOW_FAILED))
        }
    }
}
