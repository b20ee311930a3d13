//! # techdocs-prepare CLI (`tdp`)
//!
//! Resolve and materialize documentation sources from the command line.
//!
//! ## Usage
//!
//! ```bash
//! tdp --config ./config/tdp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tdp resolve <entity.yaml>` | Print the resolved documentation location |
//! | `tdp prepare <entity.yaml>` | Materialize the source and print its directory and change token |
//! | `tdp sync <url>` | Clone or update one repository in the cache |
//! | `tdp cache-path <url>` | Print the cache directory for a repository |
//!
//! The registration location of an entity is taken from `--source`, then
//! from the entity's `backstage.io/source-location` or
//! `backstage.io/managed-by-location` annotation, and finally defaults to
//! the entity file itself (`file:<path>`).
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use techdocs_prepare::annotation::{self, entity_source_location};
use techdocs_prepare::config;
use techdocs_prepare::git_auth::ConfigCredentials;
use techdocs_prepare::models::LocationKind;
use techdocs_prepare::{
    Entity, EntitySourceLocation, Materializer, Preparation, PrepareError, ResolvedLocation,
};

/// Resolve and materialize documentation sources for catalog entities.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(name = "tdp", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tdp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print where an entity's documentation lives.
    Resolve {
        /// Entity YAML file.
        entity: PathBuf,

        /// Registration location, e.g. `url:https://github.com/o/r/blob/main/catalog-info.yaml`.
        #[arg(long)]
        source: Option<String>,
    },

    /// Materialize an entity's documentation source.
    ///
    /// Prints the prepared directory and its change token, or `not modified`
    /// when `--etag` is still current.
    Prepare {
        /// Entity YAML file.
        entity: PathBuf,

        /// Registration location (`<kind>:<target>`).
        #[arg(long)]
        source: Option<String>,

        /// Change token of a previous preparation.
        #[arg(long)]
        etag: Option<String>,

        /// Print JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Clone or update a repository in the cache.
    Sync {
        /// Repository URL.
        url: String,
    },

    /// Print the cache directory for a repository URL.
    ///
    /// Asks the remote for its default branch when the URL names no ref and
    /// `--ref` is not given.
    CachePath {
        /// Repository URL.
        url: String,

        /// Ref to use instead of the one in the URL.
        #[arg(long = "ref")]
        git_ref: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,techdocs_prepare=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let materializer = Materializer::from_config(cfg.clone())?;

    match cli.command {
        Commands::Resolve { entity, source } => {
            let (entity, source) = load_entity(&entity, source.as_deref())?;
            let resolved = materializer.resolve(&entity, Some(&source))?;
            match resolved {
                ResolvedLocation::Dir(path) => println!("dir:{}", path.display()),
                ResolvedLocation::Url { target, origin } => {
                    let kind = match origin {
                        LocationKind::Dir => "url",
                        other => other.as_str(),
                    };
                    println!("{}:{}", kind, target);
                }
            }
        }
        Commands::Prepare {
            entity,
            source,
            etag,
            json,
        } => {
            let (entity, source) = load_entity(&entity, source.as_deref())?;
            let outcome = materializer
                .materialize(&entity, Some(&source), etag.as_deref())
                .await?;
            print_preparation(&outcome, json)?;
        }
        Commands::Sync { url } => {
            let synced = materializer.sync(&url).await?;
            println!("path:      {}", synced.path.display());
            println!("commit:    {}", synced.commit_id);
            if let Some(at) = synced.committed_at {
                println!("committed: {}", at.to_rfc3339());
            }
            println!("action:    {:?}", synced.action);
        }
        Commands::CachePath { url, git_ref } => {
            let cache = materializer.cache();
            let parsed = cache.parse_url(&url)?;
            let identity = match git_ref {
                Some(r) => parsed.identity(&r),
                None => {
                    let token = ConfigCredentials::new(cfg).token_for_url(&parsed.checkout_url);
                    cache.resolve_identity(&parsed, token.as_deref())?
                }
            };
            println!("{}", cache.cache_path(&identity)?.display());
        }
    }

    Ok(())
}

/// Read an entity file and pick its registration location.
fn load_entity(path: &Path, source: Option<&str>) -> Result<(Entity, EntitySourceLocation)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read entity file: {}", path.display()))?;
    let entity = Entity::from_yaml(&content)
        .with_context(|| format!("Failed to parse entity file: {}", path.display()))?;

    let source = match source {
        Some(raw) => annotation::parse_source_location(raw)?,
        None => match entity_source_location(&entity) {
            Ok(source) => source,
            Err(PrepareError::MissingSourceLocation(_)) => {
                let absolute = std::path::absolute(path)
                    .with_context(|| format!("Failed to resolve {}", path.display()))?;
                EntitySourceLocation::file(absolute.display().to_string())
            }
            Err(e) => return Err(e.into()),
        },
    };
    Ok((entity, source))
}

fn print_preparation(outcome: &Preparation, json: bool) -> Result<()> {
    match (outcome, json) {
        (Preparation::Ready(prepared), true) => {
            let value = serde_json::json!({
                "status": "ready",
                "path": prepared.path,
                "change_token": prepared.change_token,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        (Preparation::NotModified, true) => {
            println!("{}", serde_json::json!({ "status": "not_modified" }));
        }
        (Preparation::Ready(prepared), false) => {
            println!("path:         {}", prepared.path.display());
            println!("change token: {}", prepared.change_token);
        }
        (Preparation::NotModified, false) => println!("not modified"),
    }
    Ok(())
}
