//! Source materialization.
//!
//! [`Materializer`] is the entry point of the crate: entity in, prepared
//! directory out.
//!
//! ```text
//! entity ──▶ location::resolve ──┬─ Dir ─────────────▶ local dir + fingerprint
//!                                ├─ Url (git-backed) ─▶ RepositoryCache + sub-path
//!                                └─ Url ─────────────▶ TreeReader
//! ```
//!
//! # Concurrency
//!
//! Syncs of the same [`RepoIdentity`] are serialized by an async mutex per
//! identity; the cache's lock file covers other processes. Identities are
//! resolved (including any default-branch lookup) before locking, so a URL
//! with and without an explicit ref share one lock when they land on the
//! same slot.
//!
//! Git work runs on the blocking pool. Dropping a `materialize` future
//! before the blocking sync starts leaves the cache untouched; once started
//! the sync runs to completion.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::annotation::entity_source_location;
use crate::config::Config;
use crate::error::{PrepareError, PrepareResult};
use crate::fingerprint::fingerprint_dir;
use crate::git::{CliGit, GitClient};
use crate::git_auth::{ConfigCredentials, CredentialProvider};
use crate::git_url::{GitUrl, RepoIdentity};
use crate::location;
use crate::models::{Entity, EntitySourceLocation, Preparation, PreparedDirectory, ResolvedLocation};
use crate::reader_archive::ArchiveReader;
use crate::repo_cache::{RepositoryCache, SyncedRepository};
use crate::safe_path::safe_join;
use crate::tree::{fetch_tree, TreeReader};

/// One async mutex per repository identity. Entries live only while a sync
/// holds or waits for them.
#[derive(Default)]
pub struct RepoLocks {
    inner: Mutex<HashMap<RepoIdentity, Arc<tokio::sync::Mutex<()>>>>,
}

impl RepoLocks {
    pub fn lock_for(&self, identity: &RepoIdentity) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(identity.clone()).or_default().clone()
    }

    /// Wait for exclusive use of `identity`.
    pub async fn acquire(&self, identity: &RepoIdentity) -> RepoLockGuard<'_> {
        let guard = self.lock_for(identity).lock_owned().await;
        RepoLockGuard {
            locks: self,
            identity: identity.clone(),
            guard: Some(guard),
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, identity: &RepoIdentity) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(identity)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            map.remove(identity);
        }
    }
}

/// Held lock on one identity; drops its map entry when nobody else waits.
pub struct RepoLockGuard<'a> {
    locks: &'a RepoLocks,
    identity: RepoIdentity,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RepoLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.identity);
    }
}

pub struct Materializer {
    config: Config,
    cache: Arc<RepositoryCache>,
    reader: Arc<dyn TreeReader>,
    credentials: Arc<dyn CredentialProvider>,
    locks: RepoLocks,
}

impl Materializer {
    pub fn new(
        config: Config,
        git: Arc<dyn GitClient>,
        reader: Arc<dyn TreeReader>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> PrepareResult<Self> {
        let cache = RepositoryCache::new(config.clone(), git)?;
        Ok(Self {
            config,
            cache: Arc::new(cache),
            reader,
            credentials,
            locks: RepoLocks::default(),
        })
    }

    /// Materializer using the `git` CLI, the archive reader and tokens from
    /// the `[[integrations]]` table.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let git = Arc::new(CliGit::new(&config.git));
        let reader = Arc::new(ArchiveReader::new(config.clone())?);
        let credentials = Arc::new(ConfigCredentials::new(config.clone()));
        Ok(Self::new(config, git, reader, credentials)?)
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Resolve the entity's documentation location. Without an explicit
    /// `source`, the entity's own source-location annotations are used.
    pub fn resolve(
        &self,
        entity: &Entity,
        source: Option<&EntitySourceLocation>,
    ) -> PrepareResult<ResolvedLocation> {
        let derived;
        let source = match source {
            Some(source) => source,
            None => {
                derived = entity_source_location(entity)?;
                &derived
            }
        };
        location::resolve(entity, source, &self.config)
    }

    /// Resolve and fetch the entity's documentation source.
    ///
    /// `etag` is the change token of a previous preparation; when it is
    /// still current the result is [`Preparation::NotModified`].
    pub async fn materialize(
        &self,
        entity: &Entity,
        source: Option<&EntitySourceLocation>,
        etag: Option<&str>,
    ) -> PrepareResult<Preparation> {
        let location = self.resolve(entity, source)?;

        let outcome = match location {
            ResolvedLocation::Dir(ref dir) => self.prepare_local(dir, etag).await?,
            ResolvedLocation::Url { ref target, origin } if origin.is_git_backed() => {
                self.prepare_repository(target, etag).await?
            }
            ResolvedLocation::Url { .. } => {
                fetch_tree(self.reader.as_ref(), &location, etag).await?
            }
        };

        match outcome {
            Preparation::Ready(ref prepared) => tracing::info!(
                entity = %entity.entity_ref(),
                path = %prepared.path.display(),
                change_token = %prepared.change_token,
                "prepared documentation source"
            ),
            Preparation::NotModified => tracing::info!(
                entity = %entity.entity_ref(),
                "documentation source not modified"
            ),
        }
        Ok(outcome)
    }

    /// Sync one repository into the cache, serialized with any other sync
    /// of the same identity.
    pub async fn sync(&self, remote_url: &str) -> PrepareResult<SyncedRepository> {
        let url = self.cache.parse_url(remote_url)?;
        self.sync_parsed(remote_url, url).await
    }

    async fn sync_parsed(&self, remote_url: &str, url: GitUrl) -> PrepareResult<SyncedRepository> {
        let token = self
            .credentials
            .token(remote_url)
            .await
            .map_err(|e| PrepareError::SyncFailure {
                url: remote_url.to_string(),
                message: format!("credential lookup failed: {:#}", e),
            })?;

        let cache = self.cache.clone();
        let (lookup_url, lookup_token) = (url.clone(), token.clone());
        let identity = tokio::task::spawn_blocking(move || {
            cache.resolve_identity(&lookup_url, lookup_token.as_deref())
        })
        .await
        .map_err(|e| join_failure(remote_url, e))??;

        let _guard = self.locks.acquire(&identity).await;

        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.sync_identity(&url, &identity, token.as_deref()))
            .await
            .map_err(|e| join_failure(remote_url, e))?
    }

    async fn prepare_repository(
        &self,
        remote_url: &str,
        etag: Option<&str>,
    ) -> PrepareResult<Preparation> {
        let url = self.cache.parse_url(remote_url)?;
        let filepath = url.filepath.clone();
        let synced = self.sync_parsed(remote_url, url).await?;

        let dir = match filepath {
            Some(ref sub) => safe_join(&synced.path, sub)?,
            None => synced.path.clone(),
        };
        if !dir.is_dir() {
            return Err(PrepareError::io(
                &dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "directory not found in repository",
                ),
            ));
        }

        if etag == Some(synced.commit_id.as_str()) {
            return Ok(Preparation::NotModified);
        }
        Ok(Preparation::Ready(PreparedDirectory::new(
            dir,
            synced.commit_id,
        )))
    }

    async fn prepare_local(&self, dir: &Path, etag: Option<&str>) -> PrepareResult<Preparation> {
        let root = dir.to_path_buf();
        let token = tokio::task::spawn_blocking(move || fingerprint_dir(&root))
            .await
            .map_err(|e| PrepareError::io(dir, std::io::Error::other(e)))??;

        if etag == Some(token.as_str()) {
            return Ok(Preparation::NotModified);
        }
        Ok(Preparation::Ready(PreparedDirectory::new(dir, token)))
    }
}

fn join_failure(url: &str, err: tokio::task::JoinError) -> PrepareError {
    PrepareError::SyncFailure {
        url: url.to_string(),
        message: format!("sync task failed: {}", err),
    }
}
