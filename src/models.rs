//! Core data models used throughout the preparation pipeline.
//!
//! These types represent the entity being documented, the location
//! references attached to it, and the prepared directory handed to the
//! documentation builder.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Annotation holding the documentation reference.
pub const TECHDOCS_REF_ANNOTATION: &str = "backstage.io/techdocs-ref";
/// Annotation holding the location the entity's source lives at.
pub const SOURCE_LOCATION_ANNOTATION: &str = "backstage.io/source-location";
/// Annotation holding the location the entity was registered from.
pub const MANAGED_BY_LOCATION_ANNOTATION: &str = "backstage.io/managed-by-location";

/// A catalog entity, consumed only through its metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub metadata: EntityMetadata,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EntityMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Entity {
    /// Parse an entity from a catalog YAML document.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Value of an annotation, if present.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// Stringified entity reference: `kind:namespace/name`.
    pub fn entity_ref(&self) -> String {
        format!(
            "{}:{}/{}",
            self.kind.to_lowercase(),
            self.metadata.namespace.as_deref().unwrap_or("default"),
            self.metadata.name
        )
    }
}

/// Kind of a parsed location reference, without its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Dir,
    Url,
    Github,
    Gitlab,
    AzureApi,
}

impl LocationKind {
    /// Annotation spelling of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::Url => "url",
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::AzureApi => "azure/api",
        }
    }

    /// Kinds whose target is a repository served over git.
    pub fn is_git_backed(self) -> bool {
        matches!(self, Self::Github | Self::Gitlab | Self::AzureApi)
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `backstage.io/techdocs-ref` value.
///
/// Only constructed by [`crate::annotation::parse`], which guarantees a
/// non-empty target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationAnnotation {
    /// Relative or absolute filesystem path.
    Dir(String),
    /// Plain URL served by a tree reader.
    Url(String),
    /// GitHub repository URL.
    Github(String),
    /// GitLab repository URL.
    Gitlab(String),
    /// Azure DevOps repository URL.
    AzureApi(String),
}

impl LocationAnnotation {
    pub fn kind(&self) -> LocationKind {
        match self {
            Self::Dir(_) => LocationKind::Dir,
            Self::Url(_) => LocationKind::Url,
            Self::Github(_) => LocationKind::Github,
            Self::Gitlab(_) => LocationKind::Gitlab,
            Self::AzureApi(_) => LocationKind::AzureApi,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Dir(t) | Self::Url(t) | Self::Github(t) | Self::Gitlab(t) | Self::AzureApi(t) => {
                t
            }
        }
    }
}

/// Kind of the location an entity was registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocationKind {
    File,
    Url,
    /// Any other registration kind; `dir` references cannot be resolved
    /// against it.
    Other(String),
}

/// Where the entity itself was registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySourceLocation {
    pub kind: SourceLocationKind,
    pub target: String,
}

impl EntitySourceLocation {
    pub fn file(target: impl Into<String>) -> Self {
        Self {
            kind: SourceLocationKind::File,
            target: target.into(),
        }
    }

    pub fn url(target: impl Into<String>) -> Self {
        Self {
            kind: SourceLocationKind::Url,
            target: target.into(),
        }
    }

    pub fn kind_str(&self) -> &str {
        match &self.kind {
            SourceLocationKind::File => "file",
            SourceLocationKind::Url => "url",
            SourceLocationKind::Other(k) => k,
        }
    }
}

impl fmt::Display for EntitySourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_str(), self.target)
    }
}

/// An absolute, fetchable location produced by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLocation {
    /// Absolute directory on the local filesystem.
    Dir(PathBuf),
    /// Absolute URL. `origin` records which reference kind produced it, so
    /// git-backed references can be routed to the repository cache.
    Url { target: String, origin: LocationKind },
}

impl ResolvedLocation {
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Dir(_) => "dir",
            Self::Url { .. } => "url",
        }
    }

    pub fn target(&self) -> String {
        match self {
            Self::Dir(path) => path.display().to_string(),
            Self::Url { target, .. } => target.clone(),
        }
    }
}

/// Local tree handed to the documentation builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedDirectory {
    pub path: PathBuf,
    /// Commit id, etag, or content fingerprint of `path`.
    pub change_token: String,
}

impl PreparedDirectory {
    pub fn new(path: impl AsRef<Path>, change_token: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            change_token: change_token.into(),
        }
    }
}

/// Outcome of a preparation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    /// The source was materialized.
    Ready(PreparedDirectory),
    /// The caller's change token is still current; nothing was written.
    NotModified,
}

impl Preparation {
    pub fn into_prepared(self) -> Option<PreparedDirectory> {
        match self {
            Self::Ready(dir) => Some(dir),
            Self::NotModified => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTITY: &str = r#"
apiVersion: backstage.io/v1alpha1
kind: Component
metadata:
  name: payments
  annotations:
    backstage.io/techdocs-ref: dir:.
    backstage.io/managed-by-location: url:https://github.com/acme/payments/blob/main/catalog-info.yaml
spec:
  type: service
"#;

    #[test]
    fn test_entity_from_yaml() {
        let entity = Entity::from_yaml(ENTITY).unwrap();
        assert_eq!(entity.metadata.name, "payments");
        assert_eq!(entity.annotation(TECHDOCS_REF_ANNOTATION), Some("dir:."));
        assert_eq!(entity.entity_ref(), "component:default/payments");
    }

    #[test]
    fn test_annotation_accessors() {
        let a = LocationAnnotation::AzureApi("https://dev.azure.com/o/p/_git/r".into());
        assert_eq!(a.kind(), LocationKind::AzureApi);
        assert_eq!(a.kind().as_str(), "azure/api");
        assert!(a.kind().is_git_backed());
        assert!(!LocationKind::Url.is_git_backed());
    }
}
