//! Configuration types and loading
//!
//! The file path comes from `--config`, then `CONFIG_PATH`, then
//! `tank-monitor.toml`. Every other setting is read from the file, with
//! defaults for omitted keys. Account passwords come from `password_env` or
//! `password_file` rather than from plain TOML values.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use portal_client::{Credential, DEFAULT_BASE_URL, SessionConfig};
use serde::Deserialize;
use tank_poller::{DEFAULT_REFRESH_INTERVAL, Endpoints};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// Portal location, endpoints and cadence
#[derive(Debug, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_primary_endpoint")]
    pub primary_endpoint: String,
    #[serde(default)]
    pub secondary_endpoint: Option<String>,
    #[serde(default = "default_submit_endpoint")]
    pub submit_endpoint: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            primary_endpoint: default_primary_endpoint(),
            secondary_endpoint: None,
            submit_endpoint: default_submit_endpoint(),
        }
    }
}

impl PortalConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            ..SessionConfig::default()
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            primary: self.primary_endpoint.clone(),
            secondary: self.secondary_endpoint.clone(),
            submit: self.submit_endpoint.clone(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// One portal login
#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    /// Registry key; defaults to the lowercased email.
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

impl AccountConfig {
    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.email.trim().to_lowercase())
    }

    /// Credential for the session. `None` until `Config::load` resolved the password.
    pub fn credential(&self) -> Option<Credential> {
        self.password
            .clone()
            .map(|password| Credential::new(self.email.trim(), password))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9110))
}

fn default_max_connections() -> usize {
    64
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_secs()
}

fn default_primary_endpoint() -> String {
    Endpoints::default().primary
}

fn default_submit_endpoint() -> String {
    Endpoints::default().submit
}

impl Config {
    /// Load configuration from a TOML file, validate it, and resolve every
    /// account password.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        for account in &mut config.accounts {
            if account.password_env.is_none() && account.password_file.is_none() {
                return Err(common::Error::Config(format!(
                    "account {} needs password_env or password_file",
                    account.id()
                )));
            }
            let password = Secret::resolve(
                account.password_env.as_deref(),
                account.password_file.as_deref(),
            )
            .map_err(|e| {
                common::Error::Config(format!("password for account {}: {e}", account.id()))
            })?;
            account.password = Some(password);
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.portal.base_url.starts_with("http://")
            && !self.portal.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.portal.base_url
            )));
        }

        if self.portal.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.portal.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.accounts.is_empty() {
            return Err(common::Error::Config(
                "at least one [[accounts]] entry is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.email.trim().is_empty() {
                return Err(common::Error::Config("account email must not be empty".into()));
            }
            let id = account.id();
            if !seen.insert(id.clone()) {
                return Err(common::Error::Config(format!("duplicate account id: {id}")));
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tank-monitor.toml")
    }
}
