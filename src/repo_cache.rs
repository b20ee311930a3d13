//! Local repository cache.
//!
//! Each remote repository at a given ref owns one working copy under the
//! cache root:
//!
//! ```text
//! <root>/<provider>/<owner>/<repo>/<ref>
//! <root>/<provider>/<owner>/<repo>/<ref>.lock
//! ```
//!
//! # Workflow
//!
//! 1. Parse the remote URL and resolve the ref (the remote's default branch
//!    when the URL names none).
//! 2. Take the advisory `.lock` file next to the slot.
//! 3. If the slot exists and its `origin` is the requested remote: fetch,
//!    then fast-forward the checked-out branch.
//! 4. If step 3 fails for any reason, delete the slot and clone afresh.
//! 5. If the slot does not exist: clone.
//! 6. Report the head commit id.
//!
//! The update path never attempts partial repair; a slot either updates
//! cleanly or is replaced wholesale. The slot key has no host, so two hosts
//! of one provider can land on the same slot; the `origin` check turns that
//! into a reclone rather than serving the other host's repository.

use chrono::{DateTime, TimeZone, Utc};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PrepareError, PrepareResult};
use crate::git::GitClient;
use crate::git_auth::{credentials_for, GitCredentials};
use crate::git_url::{GitUrl, RepoIdentity};

/// How a sync brought the slot up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// No slot existed; cloned.
    Cloned,
    /// Existing slot fetched and merged in place.
    Updated,
    /// Update failed; slot deleted and cloned again.
    Recloned,
}

/// Result of [`RepositoryCache::sync_repository`].
#[derive(Debug, Clone)]
pub struct SyncedRepository {
    pub identity: RepoIdentity,
    /// Absolute path of the working copy.
    pub path: PathBuf,
    /// 40-hex commit id of `HEAD`.
    pub commit_id: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub action: SyncAction,
}

pub struct RepositoryCache {
    root: PathBuf,
    git: Arc<dyn GitClient>,
    config: Config,
}

impl RepositoryCache {
    /// Create a cache rooted at `config.cache.root`. A relative root is
    /// taken relative to the current directory.
    pub fn new(config: Config, git: Arc<dyn GitClient>) -> PrepareResult<Self> {
        let root = if config.cache.root.is_absolute() {
            config.cache.root.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|e| PrepareError::io(".", e))?;
            cwd.join(&config.cache.root)
        };
        Ok(Self { root, git, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse a remote URL using this cache's integration table.
    pub fn parse_url(&self, remote_url: &str) -> PrepareResult<GitUrl> {
        GitUrl::parse(remote_url, &self.config)
    }

    /// Pin `url` to a ref, asking the remote for its default branch when the
    /// URL names none.
    pub fn resolve_identity(
        &self,
        url: &GitUrl,
        token: Option<&str>,
    ) -> PrepareResult<RepoIdentity> {
        if let Some(ref git_ref) = url.git_ref {
            return Ok(url.identity(git_ref));
        }
        let creds = token.map(|t| credentials_for(url.provider, t));
        let branch = self
            .git
            .default_branch(&url.checkout_url, creds.as_ref())
            .map_err(|e| sync_failure(&url.checkout_url, &e))?;
        tracing::debug!(url = %url.checkout_url, branch = %branch, "resolved default branch");
        Ok(url.identity(&branch))
    }

    /// Cache slot for `identity`.
    pub fn cache_path(&self, identity: &RepoIdentity) -> PrepareResult<PathBuf> {
        identity.cache_path(&self.root)
    }

    /// Fetch-or-clone `remote_url` into its cache slot.
    pub fn sync_repository(
        &self,
        remote_url: &str,
        token: Option<&str>,
    ) -> PrepareResult<SyncedRepository> {
        let url = self.parse_url(remote_url)?;
        let identity = self.resolve_identity(&url, token)?;
        self.sync_identity(&url, &identity, token)
    }

    /// Sync an already resolved identity. Callers that serialize by identity
    /// resolve first, lock, then call this.
    pub fn sync_identity(
        &self,
        url: &GitUrl,
        identity: &RepoIdentity,
        token: Option<&str>,
    ) -> PrepareResult<SyncedRepository> {
        let path = self.cache_path(identity)?;
        let creds = token.map(|t| credentials_for(identity.provider, t));
        let _lock = lock_slot(&path)?;

        let (commit_id, action) = if path.exists() {
            match self.update(url, &path, creds.as_ref()) {
                Ok(commit) => {
                    tracing::info!(repo = %identity, commit = %commit, "updated cached repository");
                    (commit, SyncAction::Updated)
                }
                Err(e) => {
                    tracing::warn!(
                        repo = %identity,
                        path = %path.display(),
                        error = %format!("{:#}", e),
                        "failed to update cached repository, removing it"
                    );
                    std::fs::remove_dir_all(&path).map_err(|e| PrepareError::io(&path, e))?;
                    let commit = self.clone_fresh(url, identity, &path, creds.as_ref())?;
                    (commit, SyncAction::Recloned)
                }
            }
        } else {
            let commit = self.clone_fresh(url, identity, &path, creds.as_ref())?;
            (commit, SyncAction::Cloned)
        };

        let committed_at = match self.git.head_commit_time(&path) {
            Ok(ts) => Utc.timestamp_opt(ts, 0).single(),
            Err(e) => {
                tracing::debug!(error = %e, "could not read commit timestamp");
                None
            }
        };

        Ok(SyncedRepository {
            identity: identity.clone(),
            path,
            commit_id,
            committed_at,
            action,
        })
    }

    fn update(
        &self,
        url: &GitUrl,
        path: &Path,
        creds: Option<&GitCredentials>,
    ) -> anyhow::Result<String> {
        let origin = self.git.remote_url(path)?;
        if origin != url.checkout_url {
            anyhow::bail!("slot belongs to {}, not {}", origin, url.checkout_url);
        }
        let branch = self.git.current_branch(path)?;
        self.git.fetch(path, creds)?;
        if let Some(branch) = branch {
            self.git.merge(path, &branch)?;
        }
        self.git.head_commit(path)
    }

    fn clone_fresh(
        &self,
        url: &GitUrl,
        identity: &RepoIdentity,
        path: &Path,
        creds: Option<&GitCredentials>,
    ) -> PrepareResult<String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrepareError::io(parent, e))?;
        }

        tracing::info!(repo = %identity, path = %path.display(), "cloning repository");
        let result = self
            .git
            .clone_repo(&url.checkout_url, path, &identity.git_ref, creds)
            .and_then(|_| self.git.head_commit(path));

        result.map_err(|e| {
            if path.exists() {
                if let Err(rm) = std::fs::remove_dir_all(path) {
                    tracing::warn!(path = %path.display(), error = %rm, "failed to remove partial clone");
                }
            }
            sync_failure(&url.checkout_url, &e)
        })
    }
}

/// Exclusive advisory lock on `<slot>.lock`, released when the file drops.
fn lock_slot(path: &Path) -> PrepareResult<File> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_path = PathBuf::from(lock_path);

    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PrepareError::io(parent, e))?;
    }
    let file = File::create(&lock_path).map_err(|e| PrepareError::io(&lock_path, e))?;
    file.lock_exclusive()
        .map_err(|e| PrepareError::io(&lock_path, e))?;
    Ok(file)
}

fn sync_failure(url: &str, err: &anyhow::Error) -> PrepareError {
    PrepareError::SyncFailure {
        url: url.to_string(),
        message: format!("{:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::scripted::ScriptedGit;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn cache_with(git: Arc<ScriptedGit>) -> (TempDir, RepositoryCache) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.root = tmp.path().join("repos");
        let cache = RepositoryCache::new(config, git).unwrap();
        (tmp, cache)
    }

    #[test]
    fn test_fresh_clone_layout() {
        let git = Arc::new(ScriptedGit::new());
        let (tmp, cache) = cache_with(git.clone());

        let synced = cache
            .sync_repository("https://github.com/o/r/blob/main/", Some("tok"))
            .unwrap();

        assert_eq!(synced.path, tmp.path().join("repos/github/o/r/main"));
        assert_eq!(synced.action, SyncAction::Cloned);
        assert_eq!(synced.commit_id.len(), 40);
        assert!(synced.path.join("docs/index.md").exists());
        assert!(synced.committed_at.is_some());

        let auth = git.last_auth.lock().unwrap().clone().unwrap();
        assert_eq!(auth.username, "x-access-token");
        assert_eq!(auth.password, "tok");
    }

    #[test]
    fn test_second_sync_updates_in_place() {
        let git = Arc::new(ScriptedGit::new());
        let (_tmp, cache) = cache_with(git.clone());
        let url = "https://github.com/o/r/blob/main/";

        let first = cache.sync_repository(url, None).unwrap();
        let second = cache.sync_repository(url, None).unwrap();

        assert_eq!(first.commit_id, second.commit_id);
        assert_eq!(first.path, second.path);
        assert_eq!(second.action, SyncAction::Updated);
        assert_eq!(git.clones(), 1);
        assert_eq!(git.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_update_replaces_slot() {
        let git = Arc::new(ScriptedGit::new());
        let (_tmp, cache) = cache_with(git.clone());
        let url = "https://gitlab.com/group/repo/-/tree/main";

        let first = cache.sync_repository(url, None).unwrap();
        let stale = first.path.join("stale.md");
        std::fs::write(&stale, "left over").unwrap();

        git.fail_fetch.store(true, Ordering::SeqCst);
        git.set_commit(&"b".repeat(40));
        let second = cache.sync_repository(url, None).unwrap();

        assert_eq!(second.action, SyncAction::Recloned);
        assert_eq!(second.path, first.path);
        assert_eq!(second.commit_id, "b".repeat(40));
        assert!(!stale.exists(), "pre-failure files must be gone");
        assert!(second.path.join("mkdocs.yml").exists());
        assert_eq!(git.clones(), 2);
    }

    #[test]
    fn test_corrupt_slot_is_recloned() {
        let git = Arc::new(ScriptedGit::new());
        let (tmp, cache) = cache_with(git.clone());

        let slot = tmp.path().join("repos/github/o/r/main");
        std::fs::create_dir_all(&slot).unwrap();
        std::fs::write(slot.join("garbage"), "x").unwrap();

        let synced = cache
            .sync_repository("https://github.com/o/r/tree/main", None)
            .unwrap();
        assert_eq!(synced.action, SyncAction::Recloned);
        assert!(!slot.join("garbage").exists());
    }

    #[test]
    fn test_slot_of_other_host_is_recloned() {
        let git = Arc::new(ScriptedGit::new());
        let tmp = TempDir::new().unwrap();
        let mut config: Config = toml::from_str(
            r#"
[[integrations]]
host = "ghe.acme.dev"
provider = "github"
"#,
        )
        .unwrap();
        config.cache.root = tmp.path().join("repos");
        let cache = RepositoryCache::new(config, git.clone()).unwrap();

        let public = cache
            .sync_repository("https://github.com/o/r/tree/main", None)
            .unwrap();
        let enterprise = cache
            .sync_repository("https://ghe.acme.dev/o/r/tree/main", None)
            .unwrap();

        assert_eq!(public.path, enterprise.path);
        assert_ne!(public.identity, enterprise.identity);
        assert_eq!(enterprise.action, SyncAction::Recloned);
        assert_eq!(git.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            git.remote_url(&enterprise.path).unwrap(),
            "https://ghe.acme.dev/o/r"
        );
    }

    #[test]
    fn test_clone_failure_is_sync_failure() {
        let git = Arc::new(ScriptedGit::new());
        git.fail_clone.store(true, Ordering::SeqCst);
        let (_tmp, cache) = cache_with(git);

        let err = cache
            .sync_repository("https://github.com/o/r/tree/main", None)
            .unwrap_err();
        assert!(matches!(err, PrepareError::SyncFailure { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_default_branch_resolved_when_unspecified() {
        let git = Arc::new(ScriptedGit::new());
        let (tmp, cache) = cache_with(git.clone());

        let synced = cache
            .sync_repository("https://dev.azure.com/org/proj/_git/handbook", Some("pat"))
            .unwrap();
        assert_eq!(git.default_branch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            synced.path,
            tmp.path().join("repos/azure/org/proj/handbook/main")
        );
        let auth = git.last_auth.lock().unwrap().clone().unwrap();
        assert_eq!(auth.username, "notempty");
    }
}
