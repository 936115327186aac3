use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::Permissions;
use crate::db::models::PostSummary;
use crate::db::UnitOfWork;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentIdentity, Flash, MaybeIdentity};
use crate::repo::{NewPost, Page, PostChanges, PostRepository};
use crate::routes::display_time;
use crate::routes::home::{redirect_with_flash, Html, Viewer};
use crate::state::AppState;

pub const CREATED: &str = "Post was successfully created.";
pub const UPDATED: &str = "Post was successfully updated.";
pub const DELETED: &str = "Post was successfully deleted!";
pub const CREATE_FAILED: &str = "An error occurred. Post could not be created.";
pub const UPDATE_FAILED: &str = "An error occurred. Post could not be updated.";
pub const DELETE_FAILED: &str = "An error occurred. Post could not be deleted.";

const TITLE_MAX: usize = 128;
const CONTENTS_MAX: usize = 20_000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(index))
        .route("/posts/", get(index))
        .route("/posts/create", get(new_post).post(create_post))
        .route("/posts/{id}", get(show_post).delete(delete_post))
        .route("/posts/{id}/delete", post(delete_post))
        .route("/posts/{id}/edit", get(edit_post).post(update_post))
}

// -- View models --

pub struct PostRow {
    pub id: i64,
    pub title: String,
    pub author_id: String,
    pub author: String,
    pub timestamp: String,
}

impl From<PostSummary> for PostRow {
    fn from(summary: PostSummary) -> Self {
        Self {
            id: summary.id,
            title: summary.title,
            author_id: summary.author_id,
            author: summary.author,
            timestamp: display_time(&summary.timestamp),
        }
    }
}

pub struct PageLink {
    pub number: u32,
    pub current: bool,
    pub gap: bool,
}

fn page_links<T>(page: &Page<T>) -> Vec<PageLink> {
    page.iter_pages(2, 2)
        .into_iter()
        .map(|slot| match slot {
            Some(number) => PageLink {
                number,
                current: number == page.page,
                gap: false,
            },
            None => PageLink {
                number: 0,
                current: false,
                gap: true,
            },
        })
        .collect()
}

pub struct PostView {
    pub id: i64,
    pub title: String,
    pub contents_html: String,
    pub author_id: String,
    pub author: String,
    pub timestamp: String,
}

#[derive(Template)]
#[template(path = "pages/posts.html")]
pub struct PostsTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub posts: Vec<PostRow>,
    pub pager: Vec<PageLink>,
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub post: PostView,
    pub can_modify: bool,
}

#[derive(Template)]
#[template(path = "forms/post.html")]
pub struct PostFormTemplate {
    pub viewer: Option<Viewer>,
    pub flash: Option<String>,
    pub heading: String,
    pub action: String,
    pub title: String,
    pub contents: String,
    pub errors: Vec<String>,
}

// -- Forms --

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
}

impl ListQuery {
    /// Anything that is not a positive integer means the first page.
    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub contents: String,
}

impl PostForm {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let title = self.title.trim().chars().count();
        if title == 0 {
            errors.push("Title is required.".to_string());
        } else if title > TITLE_MAX {
            errors.push(format!("Title must be at most {} characters.", TITLE_MAX));
        }
        let contents = self.contents.trim().chars().count();
        if contents == 0 {
            errors.push("Contents are required.".to_string());
        } else if contents > CONTENTS_MAX {
            errors.push(format!(
                "Contents must be at most {} characters.",
                CONTENTS_MAX
            ));
        }
        errors
    }

    fn render(
        &self,
        viewer: Viewer,
        heading: &str,
        action: String,
        errors: Vec<String>,
    ) -> Html<PostFormTemplate> {
        Html(PostFormTemplate {
            viewer: Some(viewer),
            flash: None,
            heading: heading.to_string(),
            action,
            title: self.title.clone(),
            contents: self.contents.clone(),
            errors,
        })
    }
}

// -- Handlers --

/// GET /posts/: newest posts first, one page at a time
pub async fn index(
    State(state): State<AppState>,
    viewer: MaybeIdentity,
    Flash(flash): Flash,
    Query(query): Query<ListQuery>,
) -> AppResult<Response> {
    let page = {
        let conn = state.db.get()?;
        PostRepository::new(&conn).list(query.page(), state.config.posts.per_page)?
    };

    let pager = page_links(&page);
    let prev = page.prev_num();
    let next = page.next_num();
    Ok(Html(PostsTemplate {
        viewer: viewer.0.map(|c| Viewer::of(&c.identity)),
        flash,
        posts: page.items.into_iter().map(PostRow::from).collect(),
        pager,
        prev,
        next,
    })
    .into_response())
}

/// GET /posts/create
pub async fn new_post(current: CurrentIdentity, Flash(flash): Flash) -> AppResult<Response> {
    if !current.identity.can(Permissions::WRITE) {
        return Err(AppError::Forbidden);
    }
    Ok(Html(PostFormTemplate {
        viewer: Some(Viewer::of(&current.identity)),
        flash,
        heading: "New post".to_string(),
        action: "/posts/create".to_string(),
        title: String::new(),
        contents: String::new(),
        errors: Vec::new(),
    })
    .into_response())
}

/// POST /posts/create
pub async fn create_post(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let identity = current.identity;
    if !identity.can(Permissions::WRITE) {
        return Err(AppError::Forbidden);
    }

    let errors = form.validate();
    if !errors.is_empty() {
        let page = form.render(Viewer::of(&identity), "New post", "/posts/create".into(), errors);
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }

    let new = NewPost {
        title: form.title,
        contents: form.contents,
        author_id: identity.user_id,
    };
    let result = UnitOfWork::run(&state.db, |uow| {
        Ok::<_, AppError>(PostRepository::new(uow).create(&new, Utc::now())?)
    });

    Ok(match result {
        Ok(post) => {
            tracing::info!("Post {} created by {}", post.id, post.author_id);
            redirect_with_flash("/posts/", CREATED)
        }
        Err(e) => {
            tracing::error!("Creating post failed: {}", e);
            redirect_with_flash("/posts/", CREATE_FAILED)
        }
    })
}

/// GET /posts/{id}
pub async fn show_post(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Flash(flash): Flash,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let detail = {
        let conn = state.db.get()?;
        PostRepository::new(&conn).get_detail(id)?
    };

    let post = detail.post;
    Ok(Html(PostTemplate {
        viewer: Some(Viewer::of(&current.identity)),
        flash,
        can_modify: current.identity.may_modify(&post.author_id),
        post: PostView {
            id: post.id,
            title: post.title,
            contents_html: post.contents_html,
            author_id: post.author_id,
            author: detail.author,
            timestamp: display_time(&post.timestamp),
        },
    })
    .into_response())
}

/// GET /posts/{id}/edit
pub async fn edit_post(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Flash(flash): Flash,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let post = {
        let conn = state.db.get()?;
        PostRepository::new(&conn).get(id)?
    };
    if !current.identity.may_modify(&post.author_id) {
        return Err(AppError::Forbidden);
    }

    Ok(Html(PostFormTemplate {
        viewer: Some(Viewer::of(&current.identity)),
        flash,
        heading: "Edit post".to_string(),
        action: format!("/posts/{}/edit", id),
        title: post.title,
        contents: post.contents,
        errors: Vec::new(),
    })
    .into_response())
}

/// POST /posts/{id}/edit
pub async fn update_post(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Path(id): Path<i64>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let identity = current.identity;

    let errors = form.validate();
    if !errors.is_empty() {
        let post = {
            let conn = state.db.get()?;
            PostRepository::new(&conn).get(id)?
        };
        if !identity.may_modify(&post.author_id) {
            return Err(AppError::Forbidden);
        }
        let page = form.render(
            Viewer::of(&identity),
            "Edit post",
            format!("/posts/{}/edit", id),
            errors,
        );
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }

    let changes = PostChanges {
        title: form.title,
        contents: form.contents,
    };
    let result = UnitOfWork::run(&state.db, |uow| {
        let repo = PostRepository::new(uow);
        let post = repo.get(id)?;
        if !identity.may_modify(&post.author_id) {
            return Err(AppError::Forbidden);
        }
        Ok(repo.update(id, &changes, Utc::now())?)
    });

    match result {
        Ok(_) => Ok(redirect_with_flash("/posts/", UPDATED)),
        Err(e @ (AppError::NotFound | AppError::Forbidden)) => Err(e),
        Err(e) => {
            tracing::error!("Updating post {} failed: {}", id, e);
            Ok(redirect_with_flash(&format!("/posts/{}", id), UPDATE_FAILED))
        }
    }
}

/// DELETE /posts/{id}, or POST /posts/{id}/delete from an HTML form
pub async fn delete_post(
    State(state): State<AppState>,
    current: CurrentIdentity,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let identity = current.identity;
    let result = UnitOfWork::run(&state.db, |uow| {
        let repo = PostRepository::new(uow);
        let post = repo.get(id)?;
        if !identity.may_modify(&post.author_id) {
            return Err(AppError::Forbidden);
        }
        repo.delete(id)?;
        Ok(())
    });

    match result {
        Ok(()) => {
            tracing::info!("Post {} deleted by {}", id, identity.user_id);
            Ok(redirect_with_flash("/posts/", DELETED))
        }
        Err(e @ (AppError::NotFound | AppError::Forbidden)) => Err(e),
        Err(e) => {
            tracing::error!("Deleting post {} failed: {}", id, e);
            Ok(redirect_with_flash(&format!("/posts/{}", id), DELETE_FAILED))
        }
    }
}
