pub mod delegated;
pub mod directory;
pub mod identity;
pub mod local;
pub mod permissions;
pub mod session;

use std::sync::Arc;

pub use identity::{Credentials, Identity, IdentityBackend, IdentityKind, Profile, ProfileOutcome};
pub use permissions::Permissions;

use crate::config::{AuthBackend, Config};
use crate::state::DbPool;

pub type DynIdentityBackend = Arc<dyn IdentityBackend>;

/// Build the backend named by `auth.backend`.
pub fn backend_from_config(config: &Config, db: DbPool) -> anyhow::Result<DynIdentityBackend> {
    let backend: DynIdentityBackend = match config.auth.backend {
        AuthBackend::Local => Arc::new(local::LocalBackend::new(db, config.auth.session_hours)),
        AuthBackend::Delegated => {
            let directory = directory::HttpDirectory::from_config(&config.delegated)?;
            let authorize_url = delegated::authorize_url(&config.delegated)?;
            Arc::new(delegated::DelegatedBackend::new(
                db,
                Arc::new(directory),
                authorize_url.to_string(),
                config.delegated.id_prefix.clone(),
                config.auth.session_hours,
            ))
        }
    };
    tracing::info!("Authentication backend: {}", backend.kind().as_str());
    Ok(backend)
}
