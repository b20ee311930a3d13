//! TOML configuration.
//!
//! Every section is optional; a missing file yields [`Config::default`].
//!
//! ```toml
//! [cache]
//! root = "/var/cache/techdocs/repos"
//!
//! [git]
//! binary = "git"
//! timeout_secs = 300
//!
//! [reader]
//! timeout_secs = 60
//! work_dir = "/var/cache/techdocs/trees"
//!
//! [[integrations]]
//! host = "github.example.com"
//! provider = "github"
//! token_env = "GHE_TOKEN"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::git_url::Provider;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join("techdocs-repo")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: String,
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_git_timeout_secs(),
        }
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}
fn default_git_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Where downloaded trees are extracted.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_reader_timeout_secs(),
            user_agent: default_user_agent(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_reader_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    "techdocs-prepare".to_string()
}
fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("techdocs-trees")
}

/// One source-control host and how to authenticate against it.
#[derive(Debug, Deserialize, Clone)]
pub struct IntegrationConfig {
    pub host: String,
    pub provider: Provider,
    /// Environment variable holding the token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Inline token; takes precedence over `token_env`.
    #[serde(default)]
    pub token: Option<String>,
    /// REST API base, used by the archive reader (e.g. `https://api.github.com`).
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl IntegrationConfig {
    /// Token for this host, from the inline value or the environment.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }
        self.token_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty())
    }
}

impl Config {
    /// Integration configured for `host`, compared case-insensitively.
    pub fn integration_for_host(&self, host: &str) -> Option<&IntegrationConfig> {
        self.integrations
            .iter()
            .find(|i| i.host.eq_ignore_ascii_case(host))
    }
}

/// Load and validate the configuration file.
///
/// A path that does not exist yields the defaults, so the CLI works without
/// any setup.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.git.binary.trim().is_empty() {
        anyhow::bail!("git.binary must not be empty");
    }
    if config.git.timeout_secs == 0 {
        anyhow::bail!("git.timeout_secs must be > 0");
    }
    if config.reader.timeout_secs == 0 {
        anyhow::bail!("reader.timeout_secs must be > 0");
    }

    let mut hosts = HashSet::new();
    for integration in &config.integrations {
        if integration.host.trim().is_empty() {
            anyhow::bail!("integrations.host must not be empty");
        }
        if !hosts.insert(integration.host.to_lowercase()) {
            anyhow::bail!("duplicate integration for host '{}'", integration.host);
        }
    }

    Ok(())
}
