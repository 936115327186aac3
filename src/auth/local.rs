use async_trait::async_trait;
use chrono::Utc;

use crate::auth::identity::{
    Credentials, Identity, IdentityBackend, IdentityKind, Profile, ProfileOutcome,
};
use crate::auth::session;
use crate::config::AuthBackend;
use crate::db::models::User;
use crate::db::UnitOfWork;
use crate::error::{AppError, AppResult};
use crate::repo::users::ProfileUpdate;
use crate::repo::{RepoError, UserRepository};
use crate::state::DbPool;

/// Accounts, roles and passwords stored in the local database.
pub struct LocalBackend {
    db: DbPool,
    session_hours: u64,
}

impl LocalBackend {
    pub fn new(db: DbPool, session_hours: u64) -> Self {
        Self { db, session_hours }
    }
}

pub fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(password, cost).map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AppError::Internal(format!("password check: {}", e)))
}

fn identity_of(user: User) -> Identity {
    Identity {
        user_id: user.id,
        display_name: user.nickname,
        kind: IdentityKind::Local {
            role: user.role.name,
            permissions: user.role.permissions,
        },
    }
}

#[async_trait]
impl IdentityBackend for LocalBackend {
    fn kind(&self) -> AuthBackend {
        AuthBackend::Local
    }

    fn login_redirect(&self) -> Option<String> {
        None
    }

    async fn sign_in(&self, credentials: Credentials) -> AppResult<Option<String>> {
        let Credentials::Password { username, password } = credentials else {
            return Err(AppError::BadRequest(
                "this server signs in with a username and password".into(),
            ));
        };

        let found = {
            let conn = self.db.get()?;
            UserRepository::new(&conn).local_credentials(username.trim())?
        };
        let Some((user, hash)) = found else {
            tracing::warn!("Login refused for unknown user {:?}", username);
            return Ok(None);
        };
        if !verify_password(password, hash).await? {
            tracing::warn!("Login refused for {}: wrong password", user.username);
            return Ok(None);
        }

        let token = UnitOfWork::run(&self.db, |uow| {
            let now = Utc::now();
            UserRepository::new(uow).touch_last_seen(&user.id, now)?;
            session::purge_expired(uow, now)?;
            let token = session::create_session(uow, &user.id, self.session_hours, None, now)?;
            Ok::<_, AppError>(token)
        })?;

        tracing::info!("{} signed in", user.username);
        Ok(Some(token))
    }

    async fn sign_out(&self, session_token: &str) -> AppResult<()> {
        let conn = self.db.get()?;
        session::delete_session(&conn, session_token)?;
        Ok(())
    }

    async fn current_identity(&self, session_token: &str) -> AppResult<Option<Identity>> {
        let conn = self.db.get()?;
        let Some(record) = session::find_session(&conn, session_token, Utc::now())? else {
            return Ok(None);
        };
        match UserRepository::new(&conn).get_local(&record.user_id) {
            Ok(user) => Ok(Some(identity_of(user))),
            Err(RepoError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn profile(&self, user_id: &str) -> AppResult<Profile> {
        let conn = self.db.get()?;
        let user = UserRepository::new(&conn).get_local(user_id)?;
        Ok(Profile {
            id: user.id,
            display_name: user.nickname,
            location: user.location,
            about_me: user.about_me,
            member_since: Some(user.member_since),
            last_updated: Some(user.updated_at),
            last_seen: Some(user.last_seen),
        })
    }

    async fn editable_profile(&self, identity: &Identity) -> AppResult<ProfileUpdate> {
        let conn = self.db.get()?;
        let user = UserRepository::new(&conn).get_local(&identity.user_id)?;
        Ok(ProfileUpdate {
            nickname: user.nickname,
            location: user.location.unwrap_or_default(),
            about_me: user.about_me.unwrap_or_default(),
        })
    }

    async fn update_profile(
        &self,
        identity: &Identity,
        _session_token: &str,
        update: &ProfileUpdate,
    ) -> AppResult<ProfileOutcome> {
        UnitOfWork::run(&self.db, |uow| {
            UserRepository::new(uow).update_local_profile(&identity.user_id, update, Utc::now())?;
            Ok::<_, AppError>(())
        })?;
        Ok(ProfileOutcome::Updated)
    }
}
