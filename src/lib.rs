//! # techdocs-prepare
//!
//! Documentation source resolution and synchronization for catalog
//! entities.
//!
//! Given an entity carrying a `backstage.io/techdocs-ref` annotation, work
//! out where its documentation source lives and materialize it as a local
//! directory for a documentation builder, together with a change token
//! (commit id, etag or content fingerprint) for cheap "nothing changed"
//! checks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────┐
//! │  Entity  │──▶│  Location  │──▶│ Repository cache │──▶ <root>/<provider>/<owner>/<repo>/<ref>
//! │  (YAML)  │   │  resolver  │   │   (git CLI)      │
//! └──────────┘   └─────┬──────┘   └──────────────────┘
//!                      │          ┌──────────────────┐
//!                      ├─────────▶│   Tree reader    │──▶ extracted archive
//!                      │          └──────────────────┘
//!                      └─────────▶ local directory
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tdp resolve catalog-info.yaml
//! tdp prepare catalog-info.yaml --json
//! tdp sync https://github.com/acme/payments
//! tdp cache-path https://github.com/acme/payments/tree/main
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`annotation`] | Location annotation parsing |
//! | [`location`] | Resolving references against the registration location |
//! | [`safe_path`] | Path confinement |
//! | [`git_url`] | Remote URL parsing and cache identities |
//! | [`git_auth`] | Provider credentials |
//! | [`git`] | Git transport |
//! | [`repo_cache`] | Local repository cache |
//! | [`tree`] | Remote tree fetching |
//! | [`reader_archive`] | Zip archive tree reader |
//! | [`fingerprint`] | Change tokens for local directories |
//! | [`materialize`] | Orchestration |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |

pub mod annotation;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod git;
pub mod git_auth;
pub mod git_url;
pub mod location;
pub mod materialize;
pub mod models;
pub mod reader_archive;
pub mod repo_cache;
pub mod safe_path;
pub mod tree;

pub use error::{PrepareError, PrepareResult};
pub use materialize::Materializer;
pub use models::{Entity, EntitySourceLocation, Preparation, PreparedDirectory, ResolvedLocation};
