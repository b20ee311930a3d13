//! Zip archive tree reader.
//!
//! A [`TreeReader`] that downloads a repository snapshot as a zip archive
//! and extracts it under `reader.work_dir`.
//!
//! | Source URL | Archive endpoint | Auth header |
//! |------------|------------------|-------------|
//! | GitHub `…/tree/<ref>/<path>` | `<api>/repos/<owner>/<repo>/zipball/<ref>` | `Authorization: Bearer` |
//! | GitLab `…/-/tree/<ref>/<path>` | `<api>/projects/<id>/repository/archive.zip?sha=<ref>` | `PRIVATE-TOKEN` |
//! | Any URL ending in `.zip` | the URL itself | `Authorization: Bearer` |
//!
//! Any other URL, Azure DevOps included, is reported as
//! [`ReadTreeError::Unsupported`].
//!
//! The `<api>` base comes from the integration's `api_base_url`, defaulting
//! to `https://api.github.com` / `https://<host>/api/v3` for GitHub and
//! `https://<host>/api/v4` for GitLab. Tokens come from the same
//! `[[integrations]]` table used for git.
//!
//! # Change detection
//!
//! The previous etag is sent as `If-None-Match`; HTTP 304 maps to
//! [`ReadTreeError::NotModified`]. When the server sends no `ETag`, the
//! SHA-256 of the archive is used instead and compared after download.
//!
//! # Extraction
//!
//! Entries are written into a staging directory that is renamed into place
//! once complete, so a returned directory is never partial. Every entry path
//! goes through [`safe_join`]; an archive entry escaping the staging
//! directory aborts the read.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::git_url::{GitUrl, Provider};
use crate::safe_path::safe_join;
use crate::tree::{ReadTreeError, ReadTreeResponse, TreeReader};

pub struct ArchiveReader {
    client: reqwest::Client,
    config: Config,
    work_dir: PathBuf,
}

/// Where to download an archive from and which part of it to keep.
#[derive(Debug, PartialEq, Eq)]
struct ArchivePlan {
    archive_url: String,
    /// Sub-directory inside the archive to extract.
    subpath: Option<String>,
    /// Drop the archive's single top-level directory.
    strip_root: bool,
    auth: Option<(&'static str, String)>,
}

impl ArchiveReader {
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.reader.user_agent.clone())
            .timeout(Duration::from_secs(config.reader.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let work_dir = if config.reader.work_dir.is_absolute() {
            config.reader.work_dir.clone()
        } else {
            std::env::current_dir()?.join(&config.reader.work_dir)
        };
        Ok(Self {
            client,
            config,
            work_dir,
        })
    }

    /// Archive to download for `url`, or `None` when no archive endpoint is
    /// known for it (Azure DevOps, unknown hosts, non-zip URLs).
    fn plan(&self, url: &str) -> Result<Option<ArchivePlan>> {
        if let Ok(git) = GitUrl::parse(url, &self.config) {
            let integration = self.config.integration_for_host(&git.resource);
            let token = integration.and_then(|i| i.resolve_token());
            let api_base = integration.and_then(|i| i.api_base_url.clone());

            match git.provider {
                Provider::Github => {
                    let api = api_base.unwrap_or_else(|| {
                        if git.resource.eq_ignore_ascii_case("github.com") {
                            "https://api.github.com".to_string()
                        } else {
                            format!("https://{}/api/v3", git.resource)
                        }
                    });
                    let mut archive_url = format!(
                        "{}/repos/{}/{}/zipball",
                        api.trim_end_matches('/'),
                        git.owner,
                        git.name
                    );
                    if let Some(ref git_ref) = git.git_ref {
                        archive_url.push('/');
                        archive_url.push_str(git_ref);
                    }
                    return Ok(Some(ArchivePlan {
                        archive_url,
                        subpath: git.filepath,
                        strip_root: true,
                        auth: token.map(|t| ("Authorization", format!("Bearer {}", t))),
                    }));
                }
                Provider::Gitlab => {
                    let api = api_base.unwrap_or_else(|| format!("https://{}/api/v4", git.resource));
                    let project: String = url::form_urlencoded::byte_serialize(
                        format!("{}/{}", git.owner, git.name).as_bytes(),
                    )
                    .collect();
                    let mut archive_url = format!(
                        "{}/projects/{}/repository/archive.zip",
                        api.trim_end_matches('/'),
                        project
                    );
                    if let Some(ref git_ref) = git.git_ref {
                        archive_url.push_str("?sha=");
                        archive_url
                            .extend(url::form_urlencoded::byte_serialize(git_ref.as_bytes()));
                    }
                    return Ok(Some(ArchivePlan {
                        archive_url,
                        subpath: git.filepath,
                        strip_root: true,
                        auth: token.map(|t| ("PRIVATE-TOKEN", t)),
                    }));
                }
                Provider::Azure | Provider::Other => {}
            }
        }

        let parsed = url::Url::parse(url).with_context(|| format!("Invalid tree URL: {}", url))?;
        if parsed.path().ends_with(".zip") {
            let token = parsed
                .host_str()
                .and_then(|h| self.config.integration_for_host(h))
                .and_then(|i| i.resolve_token());
            return Ok(Some(ArchivePlan {
                archive_url: url.to_string(),
                subpath: None,
                strip_root: false,
                auth: token.map(|t| ("Authorization", format!("Bearer {}", t))),
            }));
        }

        Ok(None)
    }
}

#[async_trait]
impl TreeReader for ArchiveReader {
    async fn read_tree(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> Result<ReadTreeResponse, ReadTreeError> {
        let plan = self
            .plan(url)?
            .ok_or_else(|| ReadTreeError::Unsupported(url.to_string()))?;

        let mut req = self.client.get(&plan.archive_url);
        if let Some((name, ref value)) = plan.auth {
            req = req.header(name, value.as_str());
        }
        if let Some(etag) = etag {
            req = req.header(IF_NONE_MATCH, etag);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to download {}", plan.archive_url))?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Err(ReadTreeError::NotModified);
        }
        if !resp.status().is_success() {
            return Err(anyhow!(
                "Archive download failed (HTTP {}) for {}",
                resp.status(),
                plan.archive_url
            )
            .into());
        }

        let header_etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", plan.archive_url))?;
        let new_etag = header_etag.unwrap_or_else(|| hex_sha256(&bytes));
        if etag == Some(new_etag.as_str()) {
            return Err(ReadTreeError::NotModified);
        }

        let dest = self
            .work_dir
            .join(format!("{}-{}", short_hash(url), short_hash(&new_etag)));
        let subpath = plan.subpath.clone();
        let strip_root = plan.strip_root;
        let work_dir = self.work_dir.clone();
        let dir = tokio::task::spawn_blocking(move || {
            extract_archive(&bytes, &work_dir, &dest, subpath.as_deref(), strip_root)
        })
        .await
        .context("Archive extraction task failed")??;

        Ok(ReadTreeResponse {
            dir,
            etag: new_etag,
        })
    }
}

/// Extract `data` into `dest` via a staging directory under `work_dir`.
fn extract_archive(
    data: &[u8],
    work_dir: &Path,
    dest: &Path,
    subpath: Option<&str>,
    strip_root: bool,
) -> Result<PathBuf> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    if dest.exists() {
        // Same URL and etag were extracted before.
        return Ok(dest.to_path_buf());
    }

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(work_dir)
        .with_context(|| format!("Failed to create staging dir in {}", work_dir.display()))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(data)).context("Invalid zip archive")?;
    let prefix = subpath
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{}/", p));

    let mut extracted = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();

        let rel = if strip_root {
            match name.split_once('/') {
                Some((_, rest)) => rest,
                None => continue,
            }
        } else {
            name.as_str()
        };
        let rel = match prefix {
            Some(ref p) => match rel.strip_prefix(p.as_str()) {
                Some(rest) => rest,
                None => continue,
            },
            None => rel,
        };
        if rel.is_empty() {
            continue;
        }

        let target = safe_join(staging.path(), rel)?;
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    if extracted == 0 {
        match subpath {
            Some(p) => bail!("Archive has no files under '{}'", p),
            None => bail!("Archive is empty"),
        }
    }

    if let Err(e) = std::fs::rename(staging.path(), dest) {
        // A concurrent read of the same snapshot finished first.
        if !dest.exists() {
            return Err(e).with_context(|| format!("Failed to move tree to {}", dest.display()));
        }
    }
    Ok(dest.to_path_buf())
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn short_hash(input: &str) -> String {
    hex_sha256(input.as_bytes())[..12].to_string()
}
