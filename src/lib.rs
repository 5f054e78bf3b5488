//! github-catalog - curated GitHub repository catalog
//!
//! Discovers a configured set of repositories through the GitHub API, caches
//! their metadata in a versioned file, and imports a repository's archive
//! subtree into a local project on demand.

pub mod error;
pub mod models;
pub mod services;

#[cfg(test)]
mod test_utils;

pub use error::{CatalogError, Result};
pub use models::{CatalogConfig, RepositoryEntry, RepositoryRecord};
pub use services::{CatalogEvent, CatalogManager};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "github_catalog=info,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
