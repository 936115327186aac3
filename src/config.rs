use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "folio", about = "A small blog server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the web server (default)
    Serve,
    /// Populate the database with users, posts and follows
    Seed(SeedArgs),
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedArgs {
    /// TOML file listing `[[users]]` with username, password and role (local backend)
    #[arg(long)]
    pub users: Option<PathBuf>,

    /// Number of generated posts to add
    #[arg(long, default_value_t = 0)]
    pub posts: u32,

    /// Add random follow edges between the seeded accounts
    #[arg(long)]
    pub follows: bool,

    /// Delete existing users, posts, follows and sessions first
    #[arg(long)]
    pub reset: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub delegated: DelegatedConfig,
    pub posts: PostsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthBackend {
    #[default]
    Local,
    Delegated,
}

impl AuthBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthBackend::Local => "local",
            AuthBackend::Delegated => "delegated",
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub backend: AuthBackend,
    pub cookie_name: String,
    pub session_hours: u64,
}

/// Settings for the external identity provider.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DelegatedConfig {
    pub domain: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub management_token: Option<String>,
    pub callback_url: String,
    pub connection: String,
    /// Connection prefix of provider user ids, as in `auth0|<id>`.
    pub id_prefix: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PostsConfig {
    pub per_page: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: AuthBackend::Local,
            cookie_name: "folio_session".to_string(),
            session_hours: 720,
        }
    }
}

impl Default for DelegatedConfig {
    fn default() -> Self {
        Self {
            domain: None,
            client_id: None,
            client_secret: None,
            management_token: None,
            callback_url: "http://localhost:3000/auth/callback".to_string(),
            connection: "Username-Password-Authentication".to_string(),
            id_prefix: "auth0".to_string(),
        }
    }
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self { per_page: 20 }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("folio.db"));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(".folio"))
                .ok_or_else(|| anyhow!("could not determine home directory; pass --data-dir")),
        }
    }

    pub fn db_path(&self) -> anyhow::Result<&Path> {
        self.database
            .path
            .as_deref()
            .ok_or_else(|| anyhow!("database path is not set"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.posts.per_page == 0 {
            bail!("posts.per_page must be at least 1");
        }
        if self.auth.backend == AuthBackend::Delegated {
            if self.delegated.domain.is_none() {
                bail!("auth.backend = \"delegated\" requires delegated.domain");
            }
            if self.delegated.client_id.is_none() {
                bail!("auth.backend = \"delegated\" requires delegated.client_id");
            }
        }
        Ok(())
    }
}
