use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use crate::auth::directory::{
    local_id, DirectoryError, PatchOutcome, ProviderProfile, UserDirectory,
};
use crate::auth::identity::{
    Credentials, Identity, IdentityBackend, IdentityKind, Profile, ProfileOutcome,
};
use crate::auth::session;
use crate::config::{AuthBackend, DelegatedConfig};
use crate::db::models::DelegatedUser;
use crate::db::UnitOfWork;
use crate::error::{AppError, AppResult};
use crate::repo::users::ProfileUpdate;
use crate::repo::{RepoError, UserRepository};
use crate::state::DbPool;

/// Identities owned by an external provider. Only id, email and nickname
/// are mirrored locally; the rest of the profile is read from the provider.
pub struct DelegatedBackend {
    db: DbPool,
    directory: Arc<dyn UserDirectory>,
    authorize_url: String,
    id_prefix: String,
    session_hours: u64,
}

/// The provider's `/authorize` URL for the authorization code flow.
pub fn authorize_url(config: &DelegatedConfig) -> Result<Url, DirectoryError> {
    let domain = config
        .domain
        .as_deref()
        .ok_or_else(|| DirectoryError::NotConfigured("delegated.domain".into()))?;
    let client_id = config
        .client_id
        .as_deref()
        .ok_or_else(|| DirectoryError::NotConfigured("delegated.client_id".into()))?;

    let base = if domain.starts_with("http://") || domain.starts_with("https://") {
        Url::parse(domain)?
    } else {
        Url::parse(&format!("https://{}", domain))?
    };
    let mut url = base.join("/authorize")?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", &config.callback_url)
        .append_pair("scope", "openid profile email");
    Ok(url)
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

impl DelegatedBackend {
    pub fn new(
        db: DbPool,
        directory: Arc<dyn UserDirectory>,
        authorize_url: String,
        id_prefix: String,
        session_hours: u64,
    ) -> Self {
        Self {
            db,
            directory,
            authorize_url,
            id_prefix,
            session_hours,
        }
    }

    fn provider_id(&self, user_id: &str) -> String {
        format!("{}|{}", self.id_prefix, user_id)
    }
}

#[async_trait]
impl IdentityBackend for DelegatedBackend {
    fn kind(&self) -> AuthBackend {
        AuthBackend::Delegated
    }

    fn login_redirect(&self) -> Option<String> {
        Some(self.authorize_url.clone())
    }

    async fn sign_in(&self, credentials: Credentials) -> AppResult<Option<String>> {
        let Credentials::AuthorizationCode(code) = credentials else {
            return Err(AppError::BadRequest(
                "this server signs in through the identity provider".into(),
            ));
        };

        let access_token = match self.directory.exchange_code(&code).await {
            Ok(token) => token,
            Err(DirectoryError::Status { status, message }) if status < 500 => {
                tracing::warn!("Provider refused authorization code ({}): {}", status, message);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let info = self.directory.userinfo(&access_token).await?;

        let profile = match self.directory.user_by_email(&info.email).await? {
            Some(entry) => entry.profile(),
            None => ProviderProfile {
                nickname: info.nickname.clone().unwrap_or_else(|| {
                    info.email.split('@').next().unwrap_or_default().to_string()
                }),
                ..ProviderProfile::default()
            },
        };
        let user = DelegatedUser {
            id: local_id(&info.sub).to_string(),
            email: info.email,
            nickname: profile.nickname.clone(),
        };
        let profile_json = serde_json::to_string(&profile)?;

        let token = UnitOfWork::run(&self.db, |uow| {
            let now = Utc::now();
            UserRepository::new(uow).upsert_delegated(&user, now)?;
            session::purge_expired(uow, now)?;
            let token = session::create_session(
                uow,
                &user.id,
                self.session_hours,
                Some(&profile_json),
                now,
            )?;
            Ok::<_, AppError>(token)
        })?;

        tracing::info!("{} signed in through the identity provider", user.email);
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
        let user = match UserRepository::new(&conn).get_delegated(&record.user_id) {
            Ok(user) => user,
            Err(RepoError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let profile = match record.profile_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => ProviderProfile {
                nickname: user.nickname.clone(),
                ..ProviderProfile::default()
            },
        };
        Ok(Some(Identity {
            user_id: user.id,
            display_name: user.nickname,
            kind: IdentityKind::Delegated {
                email: user.email,
                profile,
            },
        }))
    }

    async fn profile(&self, user_id: &str) -> AppResult<Profile> {
        let user = {
            let conn = self.db.get()?;
            UserRepository::new(&conn).get_delegated(user_id)?
        };

        let entry = match self.directory.user_by_email(&user.email).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Directory lookup for {} failed: {}", user.email, e);
                None
            }
        };

        Ok(match entry {
            Some(entry) => Profile {
                id: user.id,
                display_name: entry.nickname.clone(),
                location: non_empty(entry.location()),
                about_me: non_empty(entry.about_me()),
                member_since: None,
                last_updated: entry.updated_at(),
                last_seen: entry.last_login(),
            },
            None => Profile {
                id: user.id,
                display_name: user.nickname,
                location: None,
                about_me: None,
                member_since: None,
                last_updated: None,
                last_seen: None,
            },
        })
    }

    async fn editable_profile(&self, identity: &Identity) -> AppResult<ProfileUpdate> {
        match &identity.kind {
            IdentityKind::Delegated { profile, .. } => Ok(ProfileUpdate {
                nickname: profile.nickname.clone(),
                location: profile.location.clone(),
                about_me: profile.about_me.clone(),
            }),
            IdentityKind::Local { .. } => Err(AppError::Forbidden),
        }
    }

    async fn update_profile(
        &self,
        identity: &Identity,
        session_token: &str,
        update: &ProfileUpdate,
    ) -> AppResult<ProfileOutcome> {
        let outcome = self
            .directory
            .patch_user(&self.provider_id(&identity.user_id), update)
            .await?;

        if let PatchOutcome::Rejected(message) = outcome {
            tracing::warn!(
                "Provider rejected profile update for {}: {}",
                identity.user_id,
                message
            );
            return Ok(ProfileOutcome::Rejected(message));
        }

        let profile = ProviderProfile::from(update);
        let profile_json = serde_json::to_string(&profile)?;

        UnitOfWork::run(&self.db, |uow| {
            UserRepository::new(uow).set_nickname(&identity.user_id, &profile.nickname, Utc::now())?;
            session::update_session_profile(uow, session_token, &profile_json)?;
            Ok::<_, AppError>(())
        })?;
        Ok(ProfileOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::directory::{DirectoryUser, UserInfo, UserMetadata};
    use crate::db::testing::test_pool;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubDirectory {
        users: Mutex<Vec<DirectoryUser>>,
        reject_with: Option<String>,
    }

    impl StubDirectory {
        fn with(users: Vec<DirectoryUser>) -> Self {
            Self {
                users: Mutex::new(users),
                reject_with: None,
            }
        }
    }

    #[async_trait]
    impl UserDirectory for StubDirectory {
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
            if let Some(ref message) = self.reject_with {
                return Ok(PatchOutcome::Rejected(message.clone()));
            }
            let mut users = self.users.lock().unwrap();
            let entry = users
                .iter_mut()
                .find(|u| u.user_id == provider_id)
                .ok_or(DirectoryError::Status {
                    status: 404,
                    message: "no such user".into(),
                })?;
            entry.nickname = update.nickname.clone();
            entry.user_metadata = Some(UserMetadata {
                location: Some(update.location.clone()),
                about_me: Some(update.about_me.clone()),
            });
            Ok(PatchOutcome::Accepted(Box::new(entry.clone())))
        }

        async fn exchange_code(&self, code: &str) -> Result<String, DirectoryError> {
            match code {
                "bad" => Err(DirectoryError::Status {
                    status: 403,
                    message: "invalid_grant".into(),
                }),
                other => Ok(format!("token-for-{}", other)),
            }
        }

        async fn userinfo(&self, access_token: &str) -> Result<UserInfo, DirectoryError> {
            let email = access_token.trim_start_matches("token-for-");
            let users = self.users.lock().unwrap();
            let entry = users
                .iter()
                .find(|u| u.email == email)
                .ok_or(DirectoryError::Status {
                    status: 401,
                    message: "unknown token".into(),
                })?;
            Ok(UserInfo {
                sub: entry.user_id.clone(),
                email: entry.email.clone(),
                nickname: Some(entry.nickname.clone()),
            })
        }
    }

    fn dana() -> DirectoryUser {
        DirectoryUser {
            user_id: "auth0|d4n4".into(),
            email: "dana@example.com".into(),
            nickname: "dana".into(),
            user_metadata: Some(UserMetadata {
                location: Some("Porto".into()),
                about_me: None,
            }),
            updated_at: Some("2024-03-01T10:00:00.000Z".into()),
            last_login: Some("2024-03-02T10:00:00.000Z".into()),
        }
    }

    fn backend(pool: DbPool, directory: StubDirectory) -> DelegatedBackend {
        DelegatedBackend::new(
            pool,
            Arc::new(directory),
            "https://tenant.example.com/authorize".into(),
            "auth0".into(),
            1,
        )
    }

    #[tokio::test]
    async fn callback_code_signs_in_and_mirrors_user() {
        let (pool, _tmp) = test_pool();
        let backend = backend(pool.clone(), StubDirectory::with(vec![dana()]));

        let token = backend
            .sign_in(Credentials::AuthorizationCode("dana@example.com".into()))
            .await
            .unwrap()
            .unwrap();
        let identity = backend.current_identity(&token).await.unwrap().unwrap();
        assert_eq!(identity.user_id, "d4n4");
        assert_eq!(identity.display_name, "dana");
        match identity.kind {
            IdentityKind::Delegated { email, profile } => {
                assert_eq!(email, "dana@example.com");
                assert_eq!(profile.location, "Porto");
            }
            other => panic!("unexpected identity kind {:?}", other),
        }

        let conn = pool.get().unwrap();
        let mirrored = UserRepository::new(&conn).get_delegated("d4n4").unwrap();
        assert_eq!(mirrored.email, "dana@example.com");
    }

    #[tokio::test]
    async fn refused_code_is_not_an_error() {
        let (pool, _tmp) = test_pool();
        let backend = backend(pool, StubDirectory::with(vec![dana()]));
        let result = backend
            .sign_in(Credentials::AuthorizationCode("bad".into()))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn profile_reads_provider_fields() {
        let (pool, _tmp) = test_pool();
        let backend = backend(pool, StubDirectory::with(vec![dana()]));
        backend
            .sign_in(Credentials::AuthorizationCode("dana@example.com".into()))
            .await
            .unwrap();

        let profile = backend.profile("d4n4").await.unwrap();
        assert_eq!(profile.location.as_deref(), Some("Porto"));
        assert_eq!(profile.about_me, None);
        assert!(profile.last_seen > profile.last_updated);
    }

    #[tokio::test]
    async fn accepted_update_refreshes_nickname_and_session_cache() {
        let (pool, _tmp) = test_pool();
        let backend = backend(pool.clone(), StubDirectory::with(vec![dana()]));
        let token = backend
            .sign_in(Credentials::AuthorizationCode("dana@example.com".into()))
            .await
            .unwrap()
            .unwrap();
        let identity = backend.current_identity(&token).await.unwrap().unwrap();

        let update = ProfileUpdate {
            nickname: "dana-k".into(),
            location: "Braga".into(),
            about_me: "hi".into(),
        };
        let outcome = backend.update_profile(&identity, &token, &update).await.unwrap();
        assert_eq!(outcome, ProfileOutcome::Updated);

        let refreshed = backend.current_identity(&token).await.unwrap().unwrap();
        assert_eq!(refreshed.display_name, "dana-k");
        assert_eq!(backend.editable_profile(&refreshed).await.unwrap(), update);
    }

    #[tokio::test]
    async fn rejected_update_changes_nothing_locally() {
        let (pool, _tmp) = test_pool();
        let directory = StubDirectory {
            users: Mutex::new(vec![dana()]),
            reject_with: Some("Nickname is taken".into()),
        };
        let backend = backend(pool.clone(), directory);
        let token = backend
            .sign_in(Credentials::AuthorizationCode("dana@example.com".into()))
            .await
            .unwrap()
            .unwrap();
        let identity = backend.current_identity(&token).await.unwrap().unwrap();

        let update = ProfileUpdate {
            nickname: "taken".into(),
            ..ProfileUpdate::default()
        };
        let outcome = backend.update_profile(&identity, &token, &update).await.unwrap();
        assert_eq!(outcome, ProfileOutcome::Rejected("Nickname is taken".into()));

        let conn = pool.get().unwrap();
        let mirrored = UserRepository::new(&conn).get_delegated("d4n4").unwrap();
        assert_eq!(mirrored.nickname, "dana");
    }

    #[test]
    fn authorize_url_carries_client_and_callback() {
        let config = DelegatedConfig {
            domain: Some("tenant.example.com".into()),
            client_id: Some("cid".into()),
            ..DelegatedConfig::default()
        };
        let url = authorize_url(&config).unwrap();
        assert_eq!(url.host_str(), Some("tenant.example.com"));
        assert_eq!(url.path(), "/authorize");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("client_id".into(), "cid".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://localhost:3000/auth/callback".into()
        )));
    }
}
