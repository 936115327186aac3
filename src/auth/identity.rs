use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::directory::ProviderProfile;
use crate::auth::permissions::Permissions;
use crate::config::AuthBackend;
use crate::error::AppResult;
use crate::repo::users::ProfileUpdate;

/// The caller behind a request, as resolved by the active backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub kind: IdentityKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKind {
    Local {
        role: String,
        permissions: Permissions,
    },
    Delegated {
        email: String,
        profile: ProviderProfile,
    },
}

impl Identity {
    pub fn permissions(&self) -> Permissions {
        match &self.kind {
            IdentityKind::Local { permissions, .. } => *permissions,
            IdentityKind::Delegated { .. } => Permissions::MEMBER,
        }
    }

    pub fn can(&self, required: Permissions) -> bool {
        self.permissions().contains(required)
    }

    /// Authors may change their own posts; admins may change any.
    pub fn may_modify(&self, author_id: &str) -> bool {
        self.user_id == author_id || self.can(Permissions::ADMIN)
    }
}

/// What a profile page shows, whichever backend holds the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub member_since: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileOutcome {
    Updated,
    /// Refused by the identity provider, with its explanation.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Password { username: String, password: String },
    AuthorizationCode(String),
}

/// Resolves and manages identities for one authentication backend.
///
/// One implementation is chosen at startup; handlers only see this trait.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    fn kind(&self) -> AuthBackend;

    /// External URL to send a browser to for signing in, if sign-in does not
    /// happen on the local login form.
    fn login_redirect(&self) -> Option<String>;

    /// Verify credentials and open a session. `Ok(None)` means the
    /// credentials were refused.
    async fn sign_in(&self, credentials: Credentials) -> AppResult<Option<String>>;

    async fn sign_out(&self, session_token: &str) -> AppResult<()>;

    /// `Ok(None)` for an unknown or expired session.
    async fn current_identity(&self, session_token: &str) -> AppResult<Option<Identity>>;

    async fn profile(&self, user_id: &str) -> AppResult<Profile>;

    /// Values to prefill the profile form with for the signed-in user.
    async fn editable_profile(&self, identity: &Identity) -> AppResult<ProfileUpdate>;

    async fn update_profile(
        &self,
        identity: &Identity,
        session_token: &str,
        update: &ProfileUpdate,
    ) -> AppResult<ProfileOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: &str, permissions: Permissions) -> Identity {
        Identity {
            user_id: id.to_string(),
            display_name: id.to_string(),
            kind: IdentityKind::Local {
                role: "user".to_string(),
                permissions,
            },
        }
    }

    #[test]
    fn authors_may_modify_their_own_posts() {
        let alice = local("alice", Permissions::MEMBER);
        assert!(alice.may_modify("alice"));
        assert!(!alice.may_modify("bob"));
    }

    #[test]
    fn admins_may_modify_any_post() {
        let root = local("root", Permissions::from_bits_retain(0xff));
        assert!(root.may_modify("bob"));
    }

    #[test]
    fn delegated_identities_are_members() {
        let dana = Identity {
            user_id: "d1".into(),
            display_name: "dana".into(),
            kind: IdentityKind::Delegated {
                email: "dana@example.com".into(),
                profile: ProviderProfile::default(),
            },
        };
        assert!(dana.can(Permissions::WRITE));
        assert!(dana.can(Permissions::FOLLOW));
        assert!(!dana.can(Permissions::ADMIN));
    }

    #[test]
    fn missing_permission_is_refused() {
        let reader = local("r", Permissions::FOLLOW);
        assert!(!reader.can(Permissions::WRITE));
    }
}
