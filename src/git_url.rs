//! Remote repository URL parsing.
//!
//! Turns a browse or clone URL into a [`GitUrl`]: the provider, the
//! repository coordinates, an optional ref and an optional sub-path. The
//! coordinates plus a resolved ref form the [`RepoIdentity`] that keys the
//! repository cache.
//!
//! Recognized shapes:
//!
//! ```text
//! https://github.com/<owner>/<name>[.git][/(blob|tree)/<ref>/<path>]
//! https://gitlab.com/<group>[/<subgroup>...]/<name>[/-/(blob|tree)/<ref>/<path>]
//! https://dev.azure.com/<org>/<project>/_git/<name>[?path=<path>&version=GB<ref>]
//! https://<host>/<owner...>/<name>[.git]
//! git@<host>:<owner>/<name>.git
//! file:///<dir...>/<owner>/<name>
//! ```
//!
//! A ref containing `/` cannot be told apart from the path that follows it
//! and is read as its first segment only.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::config::Config;
use crate::error::{PrepareError, PrepareResult};
use crate::safe_path::safe_join;

/// Source-control provider hosting a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Gitlab,
    Azure,
    Other,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Azure => "azure",
            Self::Other => "other",
        }
    }

    /// Provider for a host: configured integrations first, then well-known
    /// public hosts.
    pub fn for_host(host: &str, config: &Config) -> Self {
        if let Some(integration) = config.integration_for_host(host) {
            return integration.provider;
        }
        let host = host.to_ascii_lowercase();
        match host.as_str() {
            "github.com" | "www.github.com" => Self::Github,
            "gitlab.com" | "www.gitlab.com" => Self::Gitlab,
            "dev.azure.com" => Self::Azure,
            h if h.ends_with(".visualstudio.com") => Self::Azure,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key of a repository at a specific ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoIdentity {
    pub provider: Provider,
    /// Host the repository is served from.
    pub resource: String,
    /// Owner path; nested for GitLab subgroups and Azure `org/project`.
    pub owner: String,
    pub name: String,
    pub git_ref: String,
}

impl RepoIdentity {
    /// Cache slot: `<root>/<provider>/<owner>/<name>/<ref>`.
    pub fn cache_path(&self, root: &std::path::Path) -> PrepareResult<PathBuf> {
        let relative = format!(
            "{}/{}/{}/{}",
            self.provider, self.owner, self.name, self.git_ref
        );
        safe_join(root, &relative)
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}@{}",
            self.provider, self.resource, self.owner, self.name, self.git_ref
        )
    }
}

/// A parsed remote repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub provider: Provider,
    pub resource: String,
    pub owner: String,
    pub name: String,
    /// Ref named by the URL, if any.
    pub git_ref: Option<String>,
    /// Sub-path inside the repository named by the URL, if any.
    pub filepath: Option<String>,
    /// URL handed to `git clone`.
    pub checkout_url: String,
}

impl GitUrl {
    /// Parse `raw`, detecting the provider from the host.
    pub fn parse(raw: &str, config: &Config) -> PrepareResult<Self> {
        let url = parse_url(raw)?;
        let resource = url.host_str().unwrap_or("localhost").to_string();
        let provider = if url.scheme() == "file" {
            Provider::Other
        } else {
            Provider::for_host(&resource, config)
        };
        Self::parse_as(raw, &url, provider, resource)
    }

    fn parse_as(raw: &str, url: &Url, provider: Provider, resource: String) -> PrepareResult<Self> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let authority = authority(url);

        let parsed = match provider {
            Provider::Github => {
                let (owner, name, rest) = match segments.as_slice() {
                    [owner, name, rest @ ..] => (*owner, strip_git_suffix(name), rest),
                    _ => return Err(invalid(raw, "expected /<owner>/<repo>")),
                };
                let (git_ref, filepath) = ref_and_path(rest);
                Self {
                    provider,
                    checkout_url: format!("{}://{}/{}/{}", url.scheme(), authority, owner, name),
                    resource,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    git_ref,
                    filepath,
                }
            }
            Provider::Gitlab => {
                let split = segments.iter().position(|s| *s == "-");
                let (repo, rest) = match split {
                    Some(i) => (&segments[..i], &segments[i + 1..]),
                    None => (&segments[..], &[][..]),
                };
                if repo.len() < 2 {
                    return Err(invalid(raw, "expected /<group>/<repo>"));
                }
                let owner = repo[..repo.len() - 1].join("/");
                let name = strip_git_suffix(repo[repo.len() - 1]);
                let (git_ref, filepath) = ref_and_path(rest);
                Self {
                    provider,
                    checkout_url: format!("{}://{}/{}/{}.git", url.scheme(), authority, owner, name),
                    resource,
                    owner,
                    name: name.to_string(),
                    git_ref,
                    filepath,
                }
            }
            Provider::Azure => {
                let idx = segments
                    .iter()
                    .position(|s| *s == "_git")
                    .ok_or_else(|| invalid(raw, "expected /<org>/<project>/_git/<repo>"))?;
                let name = segments
                    .get(idx + 1)
                    .map(|s| strip_git_suffix(s))
                    .ok_or_else(|| invalid(raw, "missing repository name after _git"))?;
                if idx == 0 {
                    return Err(invalid(raw, "missing project before _git"));
                }
                let owner = segments[..idx].join("/");
                let mut git_ref = None;
                let mut filepath = None;
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "version" => git_ref = azure_version(&value),
                        "path" => {
                            let p = value.trim_matches('/');
                            if !p.is_empty() {
                                filepath = Some(p.to_string());
                            }
                        }
                        _ => {}
                    }
                }
                Self {
                    provider,
                    checkout_url: format!(
                        "{}://{}/{}/_git/{}",
                        url.scheme(),
                        authority,
                        owner,
                        name
                    ),
                    resource,
                    owner,
                    name: name.to_string(),
                    git_ref,
                    filepath,
                }
            }
            Provider::Other => {
                if segments.len() < 2 {
                    return Err(invalid(raw, "expected /<owner>/<repo>"));
                }
                let owner = segments[..segments.len() - 1].join("/");
                let name = strip_git_suffix(segments[segments.len() - 1]);
                let mut checkout = url.clone();
                checkout.set_query(None);
                checkout.set_fragment(None);
                Self {
                    provider,
                    checkout_url: checkout.to_string(),
                    resource,
                    owner,
                    name: name.to_string(),
                    git_ref: None,
                    filepath: None,
                }
            }
        };

        for part in parsed.owner.split('/').chain([parsed.name.as_str()]) {
            validate_component(raw, part)?;
        }
        if let Some(ref git_ref) = parsed.git_ref {
            for part in git_ref.split('/') {
                validate_component(raw, part)?;
            }
        }
        Ok(parsed)
    }

    /// Identity of this repository at `git_ref`.
    pub fn identity(&self, git_ref: &str) -> RepoIdentity {
        RepoIdentity {
            provider: self.provider,
            resource: self.resource.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            git_ref: git_ref.to_string(),
        }
    }

    /// Browse URL for `path` at the URL's ref, for providers with a
    /// tree view. `None` when the URL names no ref.
    pub fn tree_url(&self, path: &str) -> Option<String> {
        let git_ref = self.git_ref.as_ref()?;
        let base = self.checkout_url.trim_end_matches(".git");
        let path = path.trim_start_matches('/');
        match self.provider {
            Provider::Github => Some(format!("{}/tree/{}/{}", base, git_ref, path)),
            Provider::Gitlab => Some(format!("{}/-/tree/{}/{}", base, git_ref, path)),
            Provider::Azure => Some(format!("{}?path=/{}&version=GB{}", base, path, git_ref)),
            Provider::Other => None,
        }
    }
}

fn parse_url(raw: &str) -> PrepareResult<Url> {
    // scp-style: git@host:owner/repo.git
    if !raw.contains("://") {
        if let Some((user_host, path)) = raw.split_once(':') {
            if user_host.contains('@') && !path.starts_with('/') {
                return Url::parse(&format!("ssh://{}/{}", user_host, path))
                    .map_err(|e| invalid(raw, &e.to_string()));
            }
        }
    }
    Url::parse(raw).map_err(|e| invalid(raw, &e.to_string()))
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let mut out = String::new();
    if !url.username().is_empty() {
        out.push_str(url.username());
        out.push('@');
    }
    out.push_str(host);
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }
    out
}

/// `(blob|tree|raw|edit)/<ref>/<path...>` → `(ref, path)`.
fn ref_and_path(rest: &[&str]) -> (Option<String>, Option<String>) {
    match rest {
        [kind, git_ref, path @ ..] if matches!(*kind, "blob" | "tree" | "raw" | "edit") => {
            let filepath = if path.is_empty() {
                None
            } else {
                Some(path.join("/"))
            };
            (Some(git_ref.to_string()), filepath)
        }
        _ => (None, None),
    }
}

/// Azure encodes refs as `GB<branch>`, `GT<tag>` or `GC<commit>`.
fn azure_version(value: &str) -> Option<String> {
    let stripped = value
        .strip_prefix("GB")
        .or_else(|| value.strip_prefix("GT"))
        .or_else(|| value.strip_prefix("GC"))
        .unwrap_or(value);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

fn strip_git_suffix(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

fn validate_component(raw: &str, part: &str) -> PrepareResult<()> {
    if part.is_empty() || part == "." || part == ".." {
        return Err(invalid(raw, &format!("invalid path component '{}'", part)));
    }
    Ok(())
}

fn invalid(raw: &str, reason: &str) -> PrepareError {
    PrepareError::InvalidRemoteUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    }
}
