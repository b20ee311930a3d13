//! Repository cache against real `git` repositories served over `file://`.
//! Each test skips itself when no `git` binary is available.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use techdocs_prepare::config::Config;
use techdocs_prepare::git::CliGit;
use techdocs_prepare::git_auth::Anonymous;
use techdocs_prepare::reader_archive::ArchiveReader;
use techdocs_prepare::repo_cache::{RepositoryCache, SyncAction};
use techdocs_prepare::Materializer;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Docs Bot", "-c", "user.email=docs@example.com"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// An origin repository at `<tmp>/origin/team/handbook` on branch `main`.
fn setup_origin() -> (TempDir, PathBuf, String) {
    let tmp = TempDir::new().unwrap();
    let origin = tmp.path().join("origin/team/handbook");
    fs::create_dir_all(origin.join("docs")).unwrap();

    git(&origin, &["init", "--quiet"]);
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(origin.join("mkdocs.yml"), "site_name: handbook\n").unwrap();
    fs::write(origin.join("docs/index.md"), "# Handbook\n").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "--quiet", "-m", "initial"]);

    let url = format!("file://{}", origin.display());
    (tmp, origin, url)
}

fn config_in(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.root = tmp.path().join("cache");
    config.reader.work_dir = tmp.path().join("trees");
    config
}

#[test]
fn test_clone_update_and_reclone() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let (tmp, origin, url) = setup_origin();
    let config = config_in(&tmp);
    let cache = RepositoryCache::new(config.clone(), Arc::new(CliGit::new(&config.git))).unwrap();

    // Fresh clone, default branch discovered from the remote.
    let first = cache.sync_repository(&url, None).unwrap();
    assert_eq!(first.action, SyncAction::Cloned);
    assert_eq!(first.identity.git_ref, "main");
    assert!(first.path.starts_with(tmp.path().join("cache/other")));
    assert!(first.path.ends_with("team/handbook/main"));
    assert_eq!(first.commit_id, git(&origin, &["rev-parse", "HEAD"]));
    assert!(first.path.join("docs/index.md").exists());
    assert!(first.committed_at.is_some());

    // Nothing changed upstream: same commit, no reclone.
    let again = cache.sync_repository(&url, None).unwrap();
    assert_eq!(again.action, SyncAction::Updated);
    assert_eq!(again.commit_id, first.commit_id);

    // New upstream commit is fast-forwarded in place.
    fs::write(origin.join("docs/setup.md"), "# Setup\n").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "--quiet", "-m", "add setup"]);
    let updated = cache.sync_repository(&url, None).unwrap();
    assert_eq!(updated.action, SyncAction::Updated);
    assert_eq!(updated.commit_id, git(&origin, &["rev-parse", "HEAD"]));
    assert!(updated.path.join("docs/setup.md").exists());

    // Rewritten upstream history cannot fast-forward: the slot is replaced.
    let marker = updated.path.join("local-only.txt");
    fs::write(&marker, "scratch").unwrap();
    git(&origin, &["commit", "--quiet", "--amend", "-m", "rewritten"]);
    let recloned = cache.sync_repository(&url, None).unwrap();
    assert_eq!(recloned.action, SyncAction::Recloned);
    assert_eq!(recloned.path, first.path);
    assert_eq!(recloned.commit_id, git(&origin, &["rev-parse", "HEAD"]));
    assert!(!marker.exists());
}

#[test]
fn test_slot_without_git_dir_inside_project_is_recloned() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let (tmp, origin, url) = setup_origin();

    // The cache lives inside an unrelated checkout.
    let project = tmp.path().join("project");
    fs::create_dir_all(&project).unwrap();
    git(&project, &["init", "--quiet"]);
    fs::write(project.join("README.md"), "# Project\n").unwrap();
    git(&project, &["add", "."]);
    git(&project, &["commit", "--quiet", "-m", "project"]);
    let project_head = git(&project, &["rev-parse", "HEAD"]);

    let mut config = config_in(&tmp);
    config.cache.root = project.join(".cache/docs");
    let cache = RepositoryCache::new(config.clone(), Arc::new(CliGit::new(&config.git))).unwrap();

    let first = cache.sync_repository(&url, None).unwrap();
    fs::remove_dir_all(first.path.join(".git")).unwrap();

    let second = cache.sync_repository(&url, None).unwrap();
    assert_eq!(second.action, SyncAction::Recloned);
    assert_eq!(second.commit_id, git(&origin, &["rev-parse", "HEAD"]));
    assert_ne!(second.commit_id, project_head);
    assert!(second.path.join(".git").is_dir());
    assert_eq!(git(&project, &["rev-parse", "HEAD"]), project_head);
}

#[test]
fn test_slot_with_foreign_origin_is_recloned() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let (tmp, origin, url) = setup_origin();
    let config = config_in(&tmp);
    let cache = RepositoryCache::new(config.clone(), Arc::new(CliGit::new(&config.git))).unwrap();

    let first = cache.sync_repository(&url, None).unwrap();

    // Another repository occupying the same slot.
    let other = tmp.path().join("elsewhere/team/handbook");
    fs::create_dir_all(&other).unwrap();
    git(&other, &["init", "--quiet"]);
    git(&other, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(other.join("mkdocs.yml"), "site_name: impostor\n").unwrap();
    git(&other, &["add", "."]);
    git(&other, &["commit", "--quiet", "-m", "impostor"]);
    let other_url = format!("file://{}", other.display());
    git(&first.path, &["remote", "set-url", "origin", &other_url]);

    let second = cache.sync_repository(&url, None).unwrap();
    assert_eq!(second.action, SyncAction::Recloned);
    assert_eq!(second.commit_id, git(&origin, &["rev-parse", "HEAD"]));
    assert_eq!(git(&second.path, &["remote", "get-url", "origin"]), url);
    assert_eq!(
        fs::read_to_string(second.path.join("mkdocs.yml")).unwrap(),
        "site_name: handbook\n"
    );
}

#[test]
fn test_missing_remote_is_sync_failure() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let cache = RepositoryCache::new(config.clone(), Arc::new(CliGit::new(&config.git))).unwrap();

    let url = format!("file://{}/nowhere/repo", tmp.path().display());
    let err = cache.sync_repository(&url, None).unwrap_err();
    assert!(err.is_transient(), "unexpected error: {}", err);
}

#[tokio::test]
async fn test_materializer_sync_serializes_same_repository() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let (tmp, origin, url) = setup_origin();
    let config = config_in(&tmp);
    let materializer = Materializer::new(
        config.clone(),
        Arc::new(CliGit::new(&config.git)),
        Arc::new(ArchiveReader::new(config.clone()).unwrap()),
        Arc::new(Anonymous),
    )
    .unwrap();

    let (a, b) = tokio::join!(materializer.sync(&url), materializer.sync(&url));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.path, b.path);
    assert_eq!(a.commit_id, b.commit_id);
    assert_eq!(a.commit_id, git(&origin, &["rev-parse", "HEAD"]));

    let mut actions = vec![a.action, b.action];
    actions.sort_by_key(|action| format!("{:?}", action));
    assert_eq!(actions, vec![SyncAction::Cloned, SyncAction::Updated]);
}
