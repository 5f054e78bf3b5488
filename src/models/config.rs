//! Catalog configuration
//! Loaded from a JSON file; every field has a default

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CatalogError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const APP_DIR: &str = "github-catalog";
const CACHE_FILE: &str = "catalog-cache.json";

/// A configured repository and its local-only attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryEntry {
    /// `owner/name`
    pub identifier: String,

    #[serde(default)]
    pub category: String,

    /// Path of an icon inside the repository, fetched through the contents API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
}

impl RepositoryEntry {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }
}

/// Complete catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    pub api_base: String,
    pub cache_path: PathBuf,
    /// Imports land in `<project_root>/<display name>/`
    pub project_root: PathBuf,
    /// Archive subtree that gets extracted, e.g. `Assets`
    pub subtree_marker: String,
    pub archive_format: String,
    pub max_cache_age_secs: u64,
    /// Per-request timeout, `0` disables it
    pub request_timeout_secs: u64,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    pub repositories: Vec<RepositoryEntry>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            cache_path: default_cache_path(),
            project_root: PathBuf::from("."),
            subtree_marker: "Assets".to_string(),
            archive_format: "zipball".to_string(),
            max_cache_age_secs: 24 * 60 * 60,
            request_timeout_secs: 300,
            user_agent: format!("github-catalog/{}", env!("CARGO_PKG_VERSION")),
            credentials_path: None,
            repositories: Vec::new(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from disk, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: CatalogConfig = serde_json::from_str(&contents).map_err(|e| {
            CatalogError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_base)
            .map_err(|e| CatalogError::Config(format!("apiBase '{}': {}", self.api_base, e)))?;

        if self.subtree_marker.is_empty() || self.subtree_marker.contains('/') {
            return Err(CatalogError::Config(format!(
                "subtreeMarker must be a single path segment, got '{}'",
                self.subtree_marker
            )));
        }

        for entry in &self.repositories {
            if entry.identifier.split('/').filter(|s| !s.is_empty()).count() != 2 {
                return Err(CatalogError::Config(format!(
                    "repository identifier must be owner/name, got '{}'",
                    entry.identifier
                )));
            }
        }

        Ok(())
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Configured entry for an identifier
    pub fn entry(&self, identifier: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|e| e.identifier == identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.repositories.iter().map(|e| e.identifier.as_str())
    }
}

/// Platform cache location for the metadata snapshot
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(CACHE_FILE)
}
