//! Change tokens for local directories.
//!
//! A local `dir` source has no commit or etag, so its token is a SHA-256
//! over every file's relative path, size and modification time. Editing,
//! adding, removing or touching a file changes the token; `.git`,
//! `node_modules` and `target` trees are ignored.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::{PrepareError, PrepareResult};

const EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**", "**/target/**"];

/// Hex fingerprint of the files under `root`.
pub fn fingerprint_dir(root: &Path) -> PrepareResult<String> {
    if !root.is_dir() {
        return Err(PrepareError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory does not exist"),
        ));
    }
    let exclude_set = build_globset(EXCLUDES).map_err(|e| {
        PrepareError::io(root, std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            PrepareError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| PrepareError::io(path, e.into()))?;
        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        files.push((rel_str, metadata.len(), modified_nanos));
    }

    // Sort for deterministic ordering
    files.sort();

    let mut hasher = Sha256::new();
    for (rel, len, modified) in &files {
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        hasher.update(len.to_le_bytes());
        hasher.update(modified.to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}
