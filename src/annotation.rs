//! Location annotation parsing.
//!
//! A documentation reference is either a bare path (`docs`, `./site`),
//! which is shorthand for `dir:<path>`, or a `<kind>:<target>` pair:
//!
//! | Kind | Target |
//! |------|--------|
//! | `dir` | path relative to the entity's registration location |
//! | `url` | URL served by a tree reader |
//! | `github`, `gitlab`, `azure/api` | repository URL, synced through the git cache |
//!
//! Only the first `:` separates kind from target, so
//! `url:https://example.com` keeps its scheme.

use crate::error::{PrepareError, PrepareResult};
use crate::models::{
    Entity, EntitySourceLocation, LocationAnnotation, SourceLocationKind,
    MANAGED_BY_LOCATION_ANNOTATION, SOURCE_LOCATION_ANNOTATION,
};

/// Parse a documentation reference annotation value.
pub fn parse(raw: &str) -> PrepareResult<LocationAnnotation> {
    if raw.trim().is_empty() {
        return Err(invalid(raw, "annotation is empty"));
    }

    if !raw.contains(':') {
        return Ok(LocationAnnotation::Dir(raw.to_string()));
    }

    let (kind, target) = split_reference(raw)?;
    match kind {
        "dir" => Ok(LocationAnnotation::Dir(target.to_string())),
        "url" => Ok(LocationAnnotation::Url(target.to_string())),
        "github" => Ok(LocationAnnotation::Github(target.to_string())),
        "gitlab" => Ok(LocationAnnotation::Gitlab(target.to_string())),
        "azure/api" => Ok(LocationAnnotation::AzureApi(target.to_string())),
        "http" | "https" => Err(invalid(raw, "bare URLs must be prefixed with 'url:'")),
        other => Err(PrepareError::UnsupportedLocationKind(other.to_string())),
    }
}

/// Parse a `<kind>:<target>` registration location such as
/// `file:/repo/catalog-info.yaml` or `url:https://host/catalog-info.yaml`.
pub fn parse_source_location(raw: &str) -> PrepareResult<EntitySourceLocation> {
    let (kind, target) = split_reference(raw)?;
    let kind = match kind {
        "file" => SourceLocationKind::File,
        "url" => SourceLocationKind::Url,
        other => SourceLocationKind::Other(other.to_string()),
    };
    Ok(EntitySourceLocation {
        kind,
        target: target.to_string(),
    })
}

/// Registration location recorded on the entity itself.
///
/// Prefers `backstage.io/source-location` and falls back to
/// `backstage.io/managed-by-location`.
pub fn entity_source_location(entity: &Entity) -> PrepareResult<EntitySourceLocation> {
    let raw = entity
        .annotation(SOURCE_LOCATION_ANNOTATION)
        .or_else(|| entity.annotation(MANAGED_BY_LOCATION_ANNOTATION))
        .ok_or_else(|| PrepareError::MissingSourceLocation(entity.entity_ref()))?;
    parse_source_location(raw)
}

fn split_reference(raw: &str) -> PrepareResult<(&str, &str)> {
    let (kind, target) = raw
        .split_once(':')
        .ok_or_else(|| invalid(raw, "expected '<kind>:<target>'"))?;
    let kind = kind.trim();
    let target = target.trim();
    if kind.is_empty() {
        return Err(invalid(raw, "location kind is empty"));
    }
    if target.is_empty() {
        return Err(invalid(raw, "location target is empty"));
    }
    Ok((kind, target))
}

fn invalid(raw: &str, reason: &str) -> PrepareError {
    PrepareError::InvalidAnnotation {
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}
