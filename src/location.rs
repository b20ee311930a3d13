//! Location resolution.
//!
//! Turns an entity's documentation reference into an absolute location.
//! `dir` references are relative to where the entity was registered:
//!
//! | Reference | Registered from | Result |
//! |-----------|-----------------|--------|
//! | `dir:<path>` | `url:<url>` | `<url>` joined with `<path>` (RFC 3986) |
//! | `dir:/<path>` | `url:<github/gitlab blob or tree url>` | `<path>` from the repository root, same ref |
//! | `dir:<path>` | `url:<azure ?path=...>` | `<path>` joined onto the `path` query's directory, same `version` |
//! | `dir:<path>` | `file:<file>` | `<path>` under the file's directory |
//! | `dir:<path>` | anything else | `UnsupportedSourceLocation` |
//! | `url:`, `github:`, `gitlab:`, `azure/api:` | any | target as-is |

use std::path::Path;

use crate::annotation;
use crate::config::Config;
use crate::error::{PrepareError, PrepareResult};
use crate::git_url::{GitUrl, Provider};
use crate::models::{
    Entity, EntitySourceLocation, LocationAnnotation, LocationKind, ResolvedLocation,
    SourceLocationKind, TECHDOCS_REF_ANNOTATION,
};
use crate::safe_path::safe_join;

/// Resolve the entity's `backstage.io/techdocs-ref` against `source`, the
/// location the entity was registered from.
pub fn resolve(
    entity: &Entity,
    source: &EntitySourceLocation,
    config: &Config,
) -> PrepareResult<ResolvedLocation> {
    let raw = entity
        .annotation(TECHDOCS_REF_ANNOTATION)
        .ok_or_else(|| PrepareError::MissingAnnotation {
            annotation: TECHDOCS_REF_ANNOTATION.to_string(),
            entity: entity.entity_ref(),
        })?;

    let parsed = annotation::parse(raw)?;
    let resolved = match parsed {
        LocationAnnotation::Dir(ref target) => resolve_dir(target, source, config)?,
        other => ResolvedLocation::Url {
            target: other.target().to_string(),
            origin: other.kind(),
        },
    };

    tracing::debug!(
        entity = %entity.entity_ref(),
        kind = resolved.kind_str(),
        target = %resolved.target(),
        "resolved documentation location"
    );
    Ok(resolved)
}

fn resolve_dir(
    target: &str,
    source: &EntitySourceLocation,
    config: &Config,
) -> PrepareResult<ResolvedLocation> {
    match source.kind {
        SourceLocationKind::Url => {
            let joined = join_url(&source.target, target, config)?;
            Ok(ResolvedLocation::Url {
                target: joined,
                origin: LocationKind::Dir,
            })
        }
        SourceLocationKind::File => {
            let base = Path::new(&source.target)
                .parent()
                .ok_or_else(|| PrepareError::InvalidPath(source.target.clone()))?;
            Ok(ResolvedLocation::Dir(safe_join(base, target)?))
        }
        SourceLocationKind::Other(ref kind) => {
            Err(PrepareError::UnsupportedSourceLocation(kind.clone()))
        }
    }
}

fn join_url(base: &str, target: &str, config: &Config) -> PrepareResult<String> {
    if let Ok(git) = GitUrl::parse(base, config) {
        // Azure keeps the file path in the query, not the URL path.
        if git.provider == Provider::Azure {
            return join_azure(base, &git, target);
        }
        // Absolute paths are relative to the repository root, not the host.
        if target.starts_with('/') {
            if let Some(tree) = git.tree_url(target) {
                return Ok(tree);
            }
        }
    }

    let base_url = url::Url::parse(base).map_err(|e| PrepareError::InvalidRemoteUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    let joined = base_url
        .join(target)
        .map_err(|e| invalid_dir(target, e))?;
    Ok(joined.to_string())
}

/// Join `target` onto the directory of the `path` query parameter, keeping
/// every other parameter (notably `version`) as it was.
fn join_azure(base: &str, git: &GitUrl, target: &str) -> PrepareResult<String> {
    let dir = git
        .filepath
        .as_deref()
        .and_then(|p| p.rsplit_once('/'))
        .map(|(dir, _)| format!("/{}/", dir))
        .unwrap_or_else(|| "/".to_string());

    // RFC 3986 dot-segment removal on a scratch URL, clamped at the root.
    let scratch = url::Url::parse("azure://repo")
        .and_then(|u| u.join(&dir))
        .and_then(|u| u.join(target))
        .map_err(|e| invalid_dir(target, e))?;
    let path = scratch.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    let (prefix, query) = base.split_once('?').unwrap_or((base, ""));
    let mut params: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("path="))
        .map(str::to_string)
        .collect();
    params.insert(0, format!("path={}", path));
    Ok(format!("{}?{}", prefix, params.join("&")))
}

fn invalid_dir(target: &str, err: url::ParseError) -> PrepareError {
    PrepareError::InvalidAnnotation {
        value: format!("dir:{}", target),
        reason: err.to_string(),
    }
}
