//! Git transport.
//!
//! [`GitClient`] is the seam between the repository cache and the actual
//! git implementation. [`CliGit`] shells out to the `git` binary; tests
//! substitute a scripted client.
//!
//! All methods block. Callers on an async runtime run them through
//! `tokio::task::spawn_blocking`.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use crate::config::GitConfig;
use crate::git_auth::GitCredentials;

/// Operations the repository cache needs from git.
pub trait GitClient: Send + Sync {
    /// Branch the remote's `HEAD` points at.
    fn default_branch(&self, url: &str, auth: Option<&GitCredentials>) -> Result<String>;

    /// Clone `url` into `dest` (which must not exist yet) and check out
    /// `git_ref`.
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        git_ref: &str,
        auth: Option<&GitCredentials>,
    ) -> Result<()>;

    /// URL of the `origin` remote.
    fn remote_url(&self, repo_dir: &Path) -> Result<String>;

    /// Checked-out branch, or `None` when `HEAD` is detached.
    fn current_branch(&self, repo_dir: &Path) -> Result<Option<String>>;

    /// Fetch all refs from `origin`.
    fn fetch(&self, repo_dir: &Path, auth: Option<&GitCredentials>) -> Result<()>;

    /// Bring `branch` up to `origin/<branch>`.
    fn merge(&self, repo_dir: &Path, branch: &str) -> Result<()>;

    /// Full commit id of `HEAD`.
    fn head_commit(&self, repo_dir: &Path) -> Result<String>;

    /// Committer timestamp of `HEAD` (Unix epoch seconds).
    fn head_commit_time(&self, repo_dir: &Path) -> Result<i64>;
}

/// [`GitClient`] backed by the `git` command-line tool.
///
/// Credentials are passed as an `http.extraHeader` through the
/// `GIT_CONFIG_*` environment of the single invocation, so tokens never land
/// in `.git/config`, the remote URL or the process arguments. Transfers that
/// stall below 1 byte/s for `timeout_secs` are aborted.
///
/// Commands on a working copy pin `--git-dir` and `--work-tree` to that
/// directory. A directory without `.git` fails instead of falling through to
/// an enclosing repository.
pub struct CliGit {
    binary: String,
    timeout_secs: u64,
}

impl CliGit {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn command(&self, dir: Option<&Path>, auth: Option<&GitCredentials>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        let mut settings = vec![
            ("http.lowSpeedLimit", "1".to_string()),
            ("http.lowSpeedTime", self.timeout_secs.to_string()),
        ];
        if let Some(creds) = auth {
            settings.push((
                "http.extraHeader",
                format!("Authorization: {}", creds.basic_auth_header()),
            ));
        }
        cmd.env("GIT_CONFIG_COUNT", settings.len().to_string());
        for (i, (key, value)) in settings.into_iter().enumerate() {
            cmd.env(format!("GIT_CONFIG_KEY_{}", i), key);
            cmd.env(format!("GIT_CONFIG_VALUE_{}", i), value);
        }

        if let Some(dir) = dir {
            let mut git_dir = OsString::from("--git-dir=");
            git_dir.push(dir.join(".git"));
            let mut work_tree = OsString::from("--work-tree=");
            work_tree.push(dir);
            cmd.arg(git_dir).arg(work_tree);
            if let Some(parent) = dir.parent() {
                cmd.env("GIT_CEILING_DIRECTORIES", parent);
            }
            cmd.current_dir(dir);
        }
        cmd
    }

    fn run(
        &self,
        dir: Option<&Path>,
        auth: Option<&GitCredentials>,
        args: &[&str],
    ) -> Result<String> {
        let subcommand = args.first().copied().unwrap_or("git");
        let output = self
            .command(dir, auth)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", subcommand))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", subcommand, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitClient for CliGit {
    fn default_branch(&self, url: &str, auth: Option<&GitCredentials>) -> Result<String> {
        let stdout = self.run(None, auth, &["ls-remote", "--symref", url, "HEAD"])?;
        parse_symref(&stdout)
            .with_context(|| format!("Remote {} does not advertise a default branch", url))
    }

    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        git_ref: &str,
        auth: Option<&GitCredentials>,
    ) -> Result<()> {
        let dest_str = dest.to_string_lossy().to_string();
        self.run(None, auth, &["clone", "--quiet", url, dest_str.as_str()])?;
        self.run(Some(dest), None, &["checkout", "--quiet", git_ref])?;
        Ok(())
    }

    fn remote_url(&self, repo_dir: &Path) -> Result<String> {
        self.run(Some(repo_dir), None, &["remote", "get-url", "origin"])
    }

    fn current_branch(&self, repo_dir: &Path) -> Result<Option<String>> {
        let output = self
            .command(Some(repo_dir), None)
            .args(["symbolic-ref", "--quiet", "--short", "HEAD"])
            .output()
            .with_context(|| "Failed to execute 'git symbolic-ref'")?;

        // Exit code 1 with no stderr means a detached HEAD.
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            Some(1) if output.stderr.is_empty() => Ok(None),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("git symbolic-ref failed: {}", stderr.trim());
            }
        }
    }

    fn fetch(&self, repo_dir: &Path, auth: Option<&GitCredentials>) -> Result<()> {
        self.run(Some(repo_dir), auth, &["fetch", "--quiet", "--prune", "origin"])?;
        Ok(())
    }

    fn merge(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        let remote_ref = format!("origin/{}", branch);
        self.run(
            Some(repo_dir),
            None,
            &["merge", "--quiet", "--ff-only", remote_ref.as_str()],
        )?;
        Ok(())
    }

    fn head_commit(&self, repo_dir: &Path) -> Result<String> {
        let sha = self.run(Some(repo_dir), None, &["rev-parse", "HEAD"])?;
        if sha.len() != 40 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("git rev-parse HEAD returned an unexpected value: '{}'", sha);
        }
        Ok(sha)
    }

    fn head_commit_time(&self, repo_dir: &Path) -> Result<i64> {
        let ts = self.run(Some(repo_dir), None, &["log", "-1", "--format=%ct", "HEAD"])?;
        ts.parse::<i64>()
            .with_context(|| format!("Unexpected commit timestamp: '{}'", ts))
    }
}

/// Extract the branch from `git ls-remote --symref <url> HEAD` output:
///
/// ```text
/// ref: refs/heads/main	HEAD
/// 4f2c...	HEAD
/// ```
fn parse_symref(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let rest = line.strip_prefix("ref:")?;
        let (target, name) = rest.trim().split_once('\t')?;
        if name.trim() != "HEAD" {
            return None;
        }
        target
            .trim()
            .strip_prefix("refs/heads/")
            .map(str::to_string)
    })
}
