use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tdp_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tdp");
    path
}

/// A repository checkout on disk: catalog file, mkdocs config and docs.
fn setup_test_env(techdocs_ref: &str) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let repo = root.join("repo");
    fs::create_dir_all(repo.join("docs")).unwrap();
    fs::write(repo.join("mkdocs.yml"), "site_name: payments\n").unwrap();
    fs::write(repo.join("docs/index.md"), "# Payments\n\nHow payments work.\n").unwrap();

    let entity_path = repo.join("catalog-info.yaml");
    fs::write(
        &entity_path,
        format!(
            r#"apiVersion: backstage.io/v1alpha1
kind: Component
metadata:
  name: payments
  annotations:
    backstage.io/techdocs-ref: '{}'
spec:
  type: service
  owner: team-a
"#,
            techdocs_ref
        ),
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("tdp.toml");
    fs::write(
        &config_path,
        format!(
            r#"[cache]
root = "{}/cache"

[reader]
work_dir = "{}/trees"
"#,
            root.display(),
            root.display()
        ),
    )
    .unwrap();

    (tmp, config_path, entity_path)
}

fn run_tdp(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tdp_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tdp binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_resolve_dir_against_entity_file() {
    let (tmp, config, entity) = setup_test_env("dir:docs");
    let (stdout, stderr, success) = run_tdp(&config, &["resolve", entity.to_str().unwrap()]);
    assert!(success, "resolve failed: {}", stderr);
    assert_eq!(
        stdout.trim(),
        format!("dir:{}", tmp.path().join("repo/docs").display())
    );
}

#[test]
fn test_resolve_with_url_source() {
    let (_tmp, config, entity) = setup_test_env("dir:./docs");
    let (stdout, stderr, success) = run_tdp(
        &config,
        &[
            "resolve",
            entity.to_str().unwrap(),
            "--source",
            "url:https://github.com/acme/payments/blob/main/catalog-info.yaml",
        ],
    );
    assert!(success, "resolve failed: {}", stderr);
    assert_eq!(
        stdout.trim(),
        "url:https://github.com/acme/payments/blob/main/docs"
    );
}

#[test]
fn test_resolve_git_backed_reference() {
    let (_tmp, config, entity) = setup_test_env("github:https://github.com/acme/payments/tree/main");
    let (stdout, _, success) = run_tdp(&config, &["resolve", entity.to_str().unwrap()]);
    assert!(success);
    assert_eq!(
        stdout.trim(),
        "github:https://github.com/acme/payments/tree/main"
    );
}

#[test]
fn test_prepare_local_dir_and_not_modified() {
    let (tmp, config, entity) = setup_test_env("dir:docs");
    let entity_arg = entity.to_str().unwrap();

    let (stdout, stderr, success) = run_tdp(&config, &["prepare", entity_arg, "--json"]);
    assert!(success, "prepare failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["status"], "ready");
    assert_eq!(
        value["path"].as_str().unwrap(),
        tmp.path().join("repo/docs").to_str().unwrap()
    );
    let token = value["change_token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    let (stdout, _, success) = run_tdp(&config, &["prepare", entity_arg, "--etag", &token]);
    assert!(success);
    assert_eq!(stdout.trim(), "not modified");

    fs::write(tmp.path().join("repo/docs/new-page.md"), "# New\n").unwrap();
    let (stdout, _, success) = run_tdp(&config, &["prepare", entity_arg, "--etag", &token]);
    assert!(success);
    assert!(stdout.contains("change token:"));
    assert!(!stdout.contains(&token));
}

#[test]
fn test_traversal_is_rejected() {
    let (_tmp, config, entity) = setup_test_env("dir:../../etc");
    let (stdout, stderr, success) = run_tdp(&config, &["prepare", entity.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("escapes base directory"), "stderr: {}", stderr);
}

#[test]
fn test_unsupported_kind() {
    let (_tmp, config, entity) = setup_test_env("bitbucket:https://bitbucket.org/o/r");
    let (_, stderr, success) = run_tdp(&config, &["resolve", entity.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported location kind 'bitbucket'"));
}

#[test]
fn test_missing_annotation() {
    let (tmp, config, _) = setup_test_env("dir:docs");
    let bare = tmp.path().join("bare.yaml");
    fs::write(&bare, "kind: Component\nmetadata:\n  name: bare\n").unwrap();

    let (_, stderr, success) = run_tdp(&config, &["resolve", bare.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("backstage.io/techdocs-ref"));
    assert!(stderr.contains("component:default/bare"));
}

#[test]
fn test_malformed_source_location_is_reported() {
    let (tmp, config, _) = setup_test_env("dir:docs");
    let entity = tmp.path().join("repo/broken.yaml");
    fs::write(
        &entity,
        r#"kind: Component
metadata:
  name: broken
  annotations:
    backstage.io/techdocs-ref: dir:docs
    backstage.io/source-location: catalog-info.yaml
"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_tdp(&config, &["resolve", entity.to_str().unwrap()]);
    assert!(!success, "resolved to: {}", stdout);
    assert!(stdout.is_empty());
    assert!(
        stderr.contains("invalid location annotation 'catalog-info.yaml'"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_cache_path_with_explicit_ref() {
    let (tmp, config, _) = setup_test_env("dir:docs");
    let (stdout, stderr, success) = run_tdp(
        &config,
        &[
            "cache-path",
            "https://gitlab.com/group/sub/handbook.git",
            "--ref",
            "v2",
        ],
    );
    assert!(success, "cache-path failed: {}", stderr);
    assert_eq!(
        PathBuf::from(stdout.trim()),
        tmp.path().join("cache/gitlab/group/sub/handbook/v2")
    );
}

#[test]
fn test_invalid_config_is_reported() {
    let (tmp, _, entity) = setup_test_env("dir:docs");
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[git]\ntimeout_secs = 0\n").unwrap();

    let (_, stderr, success) = run_tdp(&bad, &["resolve", entity.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("git.timeout_secs must be > 0"));
}
