//! Metadata cache store
//!
//! Persists the record collection as a versioned JSON snapshot. A file written
//! by any other schema version is ignored as a whole, as is a missing or
//! unreadable file; the catalog then re-fetches everything.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::RepositoryRecord;

/// Bump whenever the persisted layout changes
pub const CACHE_SCHEMA_VERSION: u32 = 5;

/// Persisted form of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRecord {
    identifier: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    download: String,
    #[serde(default)]
    category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    /// Base64 icon, empty when there is none
    #[serde(default)]
    icone: String,
}

impl From<&RepositoryRecord> for CachedRecord {
    fn from(record: &RepositoryRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            name: record.display_name.clone(),
            desc: record.description.clone(),
            download: record.archive_template_url.clone(),
            category: record.category.clone(),
            etag: record.entity_tag.clone(),
            icone: record
                .icon_bytes
                .as_deref()
                .map(|bytes| BASE64.encode(bytes))
                .unwrap_or_default(),
        }
    }
}

impl CachedRecord {
    fn into_record(self) -> RepositoryRecord {
        let icon_bytes = if self.icone.is_empty() {
            None
        } else {
            match BASE64.decode(self.icone.as_bytes()) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!("Dropping undecodable icon for {}: {}", self.identifier, e);
                    None
                }
            }
        };

        RepositoryRecord {
            identifier: self.identifier,
            display_name: self.name,
            description: self.desc,
            archive_template_url: self.download,
            category: self.category,
            entity_tag: self.etag,
            icon_bytes,
            active_download: None,
        }
    }
}

/// Only the version is read first, so a future layout never half-parses
#[derive(Deserialize)]
struct CacheHeader {
    version: Option<u32>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    repositories: Vec<CachedRecord>,
}

/// Records read back from a valid cache file
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    pub records: Vec<RepositoryRecord>,
}

pub struct CacheStore {
    path: PathBuf,
    max_age: Duration,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` when there is no usable cache
    pub fn load(&self) -> Option<CacheSnapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No metadata cache at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let header: CacheHeader = match serde_json::from_str(&contents) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Ignoring malformed cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        if header.version != Some(CACHE_SCHEMA_VERSION) {
            tracing::info!(
                "Cache version {:?} does not match {}, ignoring {}",
                header.version,
                CACHE_SCHEMA_VERSION,
                self.path.display()
            );
            return None;
        }

        let document: CacheDocument = match serde_json::from_str(&contents) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Ignoring malformed cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        let records: Vec<RepositoryRecord> = document
            .repositories
            .into_iter()
            .map(CachedRecord::into_record)
            .collect();

        tracing::debug!(
            "Loaded {} cached record(s) saved at {}",
            records.len(),
            document.saved_at
        );

        Some(CacheSnapshot {
            saved_at: document.saved_at,
            records,
        })
    }

    /// Write the snapshot to a sibling temp file, then rename it over the cache
    pub fn save<'a>(&self, records: impl IntoIterator<Item = &'a RepositoryRecord>) -> Result<()> {
        let mut repositories: Vec<CachedRecord> =
            records.into_iter().map(CachedRecord::from).collect();
        repositories.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let document = CacheDocument {
            version: CACHE_SCHEMA_VERSION,
            saved_at: Utc::now(),
            repositories,
        };
        let contents = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        fs::write(&temp_path, contents)?;
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        tracing::debug!(
            "Saved {} record(s) to {}",
            document.repositories.len(),
            self.path.display()
        );
        Ok(())
    }

    /// True when the file is older than the maximum age or its age is unknown
    pub fn is_stale(&self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };

        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.max_age,
            // Modified in the future: clock skew, treat as fresh
            Err(_) => false,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
