//! Git transport authentication.
//!
//! Providers accept an OAuth/bearer token over HTTPS basic auth, each with
//! its own expectation for the username half:
//!
//! | Provider | Username | Password |
//! |----------|----------|----------|
//! | GitHub | `x-access-token` | token |
//! | GitLab | `oauth2` | token |
//! | Azure DevOps | `notempty` | token |
//! | Other | *(empty)* | token |

use async_trait::async_trait;
use base64::Engine;

use crate::config::Config;
use crate::git_url::Provider;

/// Username/password pair presented to the git transport.
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl GitCredentials {
    /// `Authorization` header value for HTTP basic auth.
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

/// Map a provider token onto the credentials its git transport expects.
pub fn credentials_for(provider: Provider, token: &str) -> GitCredentials {
    let username = match provider {
        Provider::Github => "x-access-token",
        Provider::Gitlab => "oauth2",
        Provider::Azure => "notempty",
        Provider::Other => "",
    };
    GitCredentials {
        username: username.to_string(),
        password: token.to_string(),
    }
}

/// Source of access tokens for remote repositories.
///
/// Queried once per sync attempt. Implementations own any timeout or
/// refresh behavior (e.g. minting short-lived app installation tokens).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Token for `remote_url`, or `None` for anonymous access.
    async fn token(&self, remote_url: &str) -> anyhow::Result<Option<String>>;
}

/// Tokens from the `[[integrations]]` table, matched by host.
pub struct ConfigCredentials {
    config: Config,
}

impl ConfigCredentials {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn token_for_url(&self, remote_url: &str) -> Option<String> {
        let host = url::Url::parse(remote_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))?;
        self.config
            .integration_for_host(&host)
            .and_then(|integration| integration.resolve_token())
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentials {
    async fn token(&self, remote_url: &str) -> anyhow::Result<Option<String>> {
        Ok(self.token_for_url(remote_url))
    }
}

/// Provider that never returns a token.
pub struct Anonymous;

#[async_trait]
impl CredentialProvider for Anonymous {
    async fn token(&self, _remote_url: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}
