//! Remote tree fetching.
//!
//! Non-git URL sources are materialized by a [`TreeReader`]: an externally
//! supplied capability that downloads a snapshot of a remote tree into a
//! local directory and reports its etag. This module only defines the
//! contract and maps reader outcomes onto [`Preparation`].
//!
//! Readers own their atomicity: a returned directory must be complete.
//! Errors are surfaced once, without retry.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{PrepareError, PrepareResult};
use crate::models::{Preparation, PreparedDirectory, ResolvedLocation};

/// A downloaded tree.
#[derive(Debug, Clone)]
pub struct ReadTreeResponse {
    /// Directory holding the tree's files.
    pub dir: PathBuf,
    /// Etag of the snapshot, passed back on the next read.
    pub etag: String,
}

/// Outcomes of [`TreeReader::read_tree`] other than a fresh tree.
#[derive(Debug, thiserror::Error)]
pub enum ReadTreeError {
    /// The supplied etag still matches the remote.
    #[error("tree not modified")]
    NotModified,

    /// The reader has no way to fetch this URL.
    #[error("no tree source known for {0}")]
    Unsupported(String),

    /// Transport, authorization or extraction failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Capability that reads a remote tree into a local directory.
#[async_trait]
pub trait TreeReader: Send + Sync {
    /// Read the tree at `url`. When `etag` is given and still current,
    /// return [`ReadTreeError::NotModified`] without downloading.
    async fn read_tree(
        &self,
        url: &str,
        etag: Option<&str>,
    ) -> Result<ReadTreeResponse, ReadTreeError>;
}

/// Fetch the tree behind a resolved URL location.
pub async fn fetch_tree(
    reader: &dyn TreeReader,
    location: &ResolvedLocation,
    etag: Option<&str>,
) -> PrepareResult<Preparation> {
    let url = match location {
        ResolvedLocation::Url { target, .. } => target.as_str(),
        ResolvedLocation::Dir(path) => {
            return Err(PrepareError::UnsupportedSourceLocation(format!(
                "dir:{}",
                path.display()
            )))
        }
    };

    tracing::debug!(url, "reading tree");
    match reader.read_tree(url, etag).await {
        Ok(response) => {
            tracing::debug!(url, dir = %response.dir.display(), "tree downloaded");
            Ok(Preparation::Ready(PreparedDirectory::new(
                response.dir,
                response.etag,
            )))
        }
        Err(ReadTreeError::NotModified) => {
            tracing::debug!(url, "tree not modified");
            Ok(Preparation::NotModified)
        }
        Err(ReadTreeError::Unsupported(url)) => Err(PrepareError::UnsupportedTreeSource(url)),
        Err(ReadTreeError::Transport(e)) => Err(PrepareError::Reader {
            url: url.to_string(),
            source: e.into(),
        }),
    }
}
