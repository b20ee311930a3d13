//! Error taxonomy for source resolution and preparation.
//!
//! Errors fall into two groups that callers treat differently:
//!
//! | Group | Variants | Caller behavior |
//! |-------|----------|-----------------|
//! | Configuration | `InvalidAnnotation`, `MissingAnnotation`, `UnsupportedLocationKind`, `UnsupportedSourceLocation`, `UnsupportedTreeSource`, `MissingSourceLocation`, `PathTraversal`, `InvalidPath`, `InvalidRemoteUrl` | Report against the entity's metadata, never retry |
//! | Transient | `SyncFailure`, `Reader`, `Io` | Eligible for caller-level retry |
//!
//! "Not modified" is deliberately absent: it is an outcome
//! ([`Preparation::NotModified`](crate::models::Preparation)), not a failure.

use std::path::PathBuf;

/// Result alias used across the library.
pub type PrepareResult<T> = Result<T, PrepareError>;

/// Errors raised while resolving or materializing a documentation source.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    /// The annotation value is empty or malformed.
    #[error("invalid location annotation '{value}': {reason}")]
    InvalidAnnotation {
        /// Raw annotation value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The entity carries no documentation reference annotation.
    #[error("no '{annotation}' annotation provided in entity: {entity}")]
    MissingAnnotation {
        /// Annotation key that was looked up.
        annotation: String,
        /// Entity reference (`kind:namespace/name`).
        entity: String,
    },

    /// The annotation names a location kind this crate cannot handle.
    #[error("unsupported location kind '{0}'")]
    UnsupportedLocationKind(String),

    /// A `dir` reference cannot be resolved against the entity's
    /// registration location kind.
    #[error("unable to resolve a dir reference against location type '{0}'")]
    UnsupportedSourceLocation(String),

    /// No tree reader can fetch the resolved URL.
    #[error("no tree reader supports '{0}'")]
    UnsupportedTreeSource(String),

    /// Neither an explicit nor an annotated source location is available.
    #[error("entity {0} has no source location")]
    MissingSourceLocation(String),

    /// The joined path leaves its base directory.
    #[error("relative path '{relative}' escapes base directory {}", base.display())]
    PathTraversal {
        /// Directory the path was confined to.
        base: PathBuf,
        /// Offending path as supplied.
        relative: String,
    },

    /// A base path or URL that must be absolute is not.
    #[error("invalid path '{0}': expected an absolute path")]
    InvalidPath(String),

    /// A remote URL could not be parsed into a repository identity.
    #[error("invalid remote url '{url}': {reason}")]
    InvalidRemoteUrl {
        /// URL as supplied.
        url: String,
        /// Parse failure.
        reason: String,
    },

    /// Clone failed, after the update path (if any) was abandoned.
    #[error("failed to sync repository {url}: {message}")]
    SyncFailure {
        /// Remote the sync targeted.
        url: String,
        /// Rendered error chain.
        message: String,
    },

    /// Transport or extraction failure reported by a tree reader, passed
    /// through as-is.
    #[error("failed to read tree {url}: {source}")]
    Reader {
        /// Location that was read.
        url: String,
        /// Error raised by the reader.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Local filesystem failure outside the git transport.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl PrepareError {
    /// True for errors attributable to the entity's metadata.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAnnotation { .. }
                | Self::MissingAnnotation { .. }
                | Self::UnsupportedLocationKind(_)
                | Self::UnsupportedSourceLocation(_)
                | Self::UnsupportedTreeSource(_)
                | Self::MissingSourceLocation(_)
                | Self::PathTraversal { .. }
                | Self::InvalidPath(_)
                | Self::InvalidRemoteUrl { .. }
        )
    }

    /// True for infrastructure failures a caller may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SyncFailure { .. } | Self::Reader { .. } | Self::Io { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
