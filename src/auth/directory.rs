//! Client for the identity provider's user directory and OAuth endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::DelegatedConfig;
use crate::db::parse_timestamp;
use crate::repo::users::ProfileUpdate;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Provider answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub about_me: Option<String>,
}

/// A user record as the provider's directory returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub user_id: String,
    pub email: String,
    pub nickname: String,
    #[serde(default)]
    pub user_metadata: Option<UserMetadata>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

impl DirectoryUser {
    /// The id used locally: the part of the provider id after `|`.
    pub fn local_id(&self) -> &str {
        local_id(&self.user_id)
    }

    pub fn location(&self) -> String {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.location.clone())
            .unwrap_or_default()
    }

    pub fn about_me(&self) -> String {
        self.user_metadata
            .as_ref()
            .and_then(|m| m.about_me.clone())
            .unwrap_or_default()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(parse_timestamp)
    }

    pub fn last_login(&self) -> Option<DateTime<Utc>> {
        self.last_login.as_deref().and_then(parse_timestamp)
    }

    pub fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            nickname: self.nickname.clone(),
            location: self.location(),
            about_me: self.about_me(),
        }
    }
}

pub fn local_id(provider_id: &str) -> &str {
    provider_id
        .split_once('|')
        .map(|(_, id)| id)
        .unwrap_or(provider_id)
}

/// The profile fields cached in a delegated session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub nickname: String,
    pub location: String,
    pub about_me: String,
}

impl From<&ProfileUpdate> for ProviderProfile {
    fn from(update: &ProfileUpdate) -> Self {
        Self {
            nickname: update.nickname.clone(),
            location: update.location.clone(),
            about_me: update.about_me.clone(),
        }
    }
}

/// Claims from the provider's `userinfo` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Accepted(Box<DirectoryUser>),
    /// The provider refused the change; the message is meant for the user.
    Rejected(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, DirectoryError>;

    async fn patch_user(
        &self,
        provider_id: &str,
        update: &ProfileUpdate,
    ) -> Result<PatchOutcome, DirectoryError>;

    /// Trade an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, DirectoryError>;

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, DirectoryError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ProviderMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// `UserDirectory` over the provider's HTTP APIs.
pub struct HttpDirectory {
    client: reqwest::Client,
    base: Url,
    client_id: String,
    client_secret: String,
    management_token: String,
    connection: String,
    callback_url: String,
}

impl HttpDirectory {
    pub fn from_config(config: &DelegatedConfig) -> Result<Self, DirectoryError> {
        let domain = config
            .domain
            .as_deref()
            .ok_or_else(|| DirectoryError::NotConfigured("delegated.domain".into()))?;
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            Url::parse(domain)?
        } else {
            Url::parse(&format!("https://{}", domain))?
        };

        Ok(Self {
            client: reqwest::Client::new(),
            base,
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            management_token: config.management_token.clone().unwrap_or_default(),
            connection: config.connection.clone(),
            callback_url: config.callback_url.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DirectoryError> {
        Ok(self.base.join(path)?)
    }

    async fn failure(response: reqwest::Response) -> DirectoryError {
        let status = response.status().as_u16();
        let message = match response.json::<ProviderMessage>().await {
            Ok(body) => body
                .message
                .or(body.error_description)
                .unwrap_or_else(|| "request failed".to_string()),
            Err(_) => "request failed".to_string(),
        };
        DirectoryError::Status { status, message }
    }
}

#[async_trait]
impl UserDirectory for HttpDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let response = self
            .client
            .get(self.endpoint("/api/v2/users")?)
            .bearer_auth(&self.management_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(response.json().await?)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let mut url = self.endpoint("/api/v2/users-by-email")?;
        url.query_pairs_mut().append_pair("email", email);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.management_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        let users: Vec<DirectoryUser> = response.json().await?;
        Ok(users.into_iter().next())
    }

    async fn patch_user(
        &self,
        provider_id: &str,
        update: &ProfileUpdate,
    ) -> Result<PatchOutcome, DirectoryError> {
        let url = self.endpoint(&format!("/api/v2/users/{}", provider_id))?;
        let body = serde_json::json!({
            "nickname": update.nickname,
            "user_metadata": {
                "location": update.location,
                "about_me": update.about_me,
            },
            "connection": self.connection,
        });

        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.management_token)
            .json(&body)
            .send()
            .await?;

        if response.status().is_client_error() {
            return match Self::failure(response).await {
                DirectoryError::Status { message, .. } => Ok(PatchOutcome::Rejected(message)),
                other => Err(other),
            };
        }
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        let user: DirectoryUser = response.json().await?;
        Ok(PatchOutcome::Accepted(Box::new(user)))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, DirectoryError> {
        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
            "redirect_uri": self.callback_url,
        });
        let response = self
            .client
            .post(self.endpoint("/oauth/token")?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn userinfo(&self, access_token: &str) -> Result<UserInfo, DirectoryError> {
        let response = self
            .client
            .get(self.endpoint("/userinfo")?)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(response.json().await?)
    }
}
