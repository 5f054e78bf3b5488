//! Repository catalog manager
//!
//! Owns the in-memory record collection and decides which requests the
//! orchestrator issues: metadata refreshes, icon fetches and archive downloads.
//! Every state change happens inside [`CatalogManager::poll_once`] or one of
//! the operation methods, all called by the owner from a single task.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;

use crate::error::{CatalogError, Result};
use crate::models::{CatalogConfig, CategoryIndex, RepositoryRecord};
use crate::services::archive_importer::{import_archive, ImportSummary};
use crate::services::cache_store::CacheStore;
use crate::services::credentials_service::Credentials;
use crate::services::orchestrator::{Orchestrator, Outcome, RequestHandle, RequestId, Resolved};
use crate::services::transport::{
    contents_url, repository_url, FetchRequest, FetchResponse, HttpTransport, Transport,
    GITHUB_JSON, GITHUB_RAW,
};

/// What a completed request feeds into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogCompletion {
    Metadata,
    Icon,
    Archive,
}

/// Something the presentation layer may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    RecordUpdated(String),
    /// The origin answered 304 for a conditional refresh
    RecordUnchanged(String),
    /// Private repositories never enter the collection
    RecordDiscarded(String),
    IconAttached(String),
    /// New files are on disk; the host should rescan its asset index
    Imported {
        identifier: String,
        summary: ImportSummary,
    },
    ImportFailed {
        identifier: String,
        reason: String,
    },
    RequestFailed {
        identifier: Option<String>,
        reason: String,
    },
}

/// Fields read from `GET /repos/{owner}/{name}`
#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    archive_url: Option<String>,
    #[serde(default)]
    private: Option<bool>,
}

pub struct CatalogManager {
    config: CatalogConfig,
    store: CacheStore,
    orchestrator: Orchestrator<CatalogCompletion>,
    records: BTreeMap<String, RepositoryRecord>,
    categories: CategoryIndex,
}

impl CatalogManager {
    pub fn new(config: CatalogConfig, transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        let store = CacheStore::new(config.cache_path.clone(), config.max_cache_age());
        Self {
            config,
            store,
            orchestrator: Orchestrator::new(transport, runtime),
            records: BTreeMap::new(),
            categories: CategoryIndex::default(),
        }
    }

    /// Build a manager talking to the real API from inside a tokio runtime
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CatalogError::Runtime(e.to_string()))?;
        let credentials = match &config.credentials_path {
            Some(path) => Credentials::load(path)?,
            None => None,
        };
        let transport = HttpTransport::new(&config, credentials.as_ref())?;
        Ok(Self::new(config, Arc::new(transport), runtime))
    }

    /// Load the cache, and fetch metadata when it is missing, invalid or stale.
    ///
    /// Returns the number of metadata requests issued.
    pub fn initialize(&mut self) -> usize {
        match self.store.load() {
            Some(snapshot) => {
                let stale = self.store.is_stale();
                self.seed(snapshot.records);
                if !stale {
                    tracing::info!(
                        "Loaded {} repositories from {}",
                        self.records.len(),
                        self.store.path().display()
                    );
                    return 0;
                }
                tracing::info!("Metadata cache is stale, refreshing");
            }
            None => tracing::info!("No usable metadata cache, fetching repository list"),
        }

        self.refresh()
    }

    /// Re-fetch metadata for every configured repository.
    ///
    /// Records that already carry an entity tag are requested conditionally.
    pub fn refresh(&mut self) -> usize {
        let targets: Vec<(String, Option<String>)> = self
            .config
            .identifiers()
            .map(|id| {
                let entity_tag = self.records.get(id).and_then(|r| r.entity_tag.clone());
                (id.to_string(), entity_tag)
            })
            .collect();

        for (identifier, entity_tag) in &targets {
            let request = FetchRequest::get(repository_url(&self.config.api_base, identifier))
                .header("accept", GITHUB_JSON)
                .if_none_match(entity_tag.clone());
            self.orchestrator
                .issue(request, CatalogCompletion::Metadata, Some(identifier.clone()));
        }

        tracing::debug!("Issued {} metadata request(s)", targets.len());
        targets.len()
    }

    /// Start downloading a repository archive
    pub fn request_import(&mut self, identifier: &str) -> Result<RequestHandle> {
        let record = self
            .records
            .get_mut(identifier)
            .ok_or_else(|| CatalogError::UnknownRecord(identifier.to_string()))?;

        if record.active_download.is_some() {
            return Err(CatalogError::AlreadyInFlight(identifier.to_string()));
        }

        let url = record.archive_url(&self.config.archive_format);
        if url.is_empty() {
            return Err(CatalogError::Custom(format!(
                "No archive URL known for {}",
                identifier
            )));
        }

        tracing::info!("Downloading {} from {}", identifier, url);
        let handle = self.orchestrator.issue(
            FetchRequest::get(url),
            CatalogCompletion::Archive,
            Some(identifier.to_string()),
        );
        record.active_download = Some(handle.clone());
        Ok(handle)
    }

    /// Apply every request that finished since the last call
    pub fn poll_once(&mut self) -> Vec<CatalogEvent> {
        let mut events = Vec::new();

        for resolved in self.orchestrator.poll_once() {
            let Resolved {
                id,
                correlation_key,
                outcome,
            } = resolved;

            let was_download = correlation_key
                .as_deref()
                .map(|identifier| self.release_download(identifier, id))
                .unwrap_or(false);

            match outcome {
                Outcome::Completed {
                    response,
                    on_complete,
                } => {
                    let Some(identifier) = correlation_key else {
                        continue;
                    };
                    match on_complete {
                        CatalogCompletion::Metadata => {
                            self.apply_metadata(identifier, response, &mut events)
                        }
                        CatalogCompletion::Icon => {
                            self.apply_icon(identifier, response, &mut events)
                        }
                        CatalogCompletion::Archive => {
                            self.apply_archive(identifier, response, &mut events)
                        }
                    }
                }
                Outcome::Failed(error) => match correlation_key {
                    Some(identifier) if was_download => events.push(CatalogEvent::ImportFailed {
                        identifier,
                        reason: error.to_string(),
                    }),
                    identifier => events.push(CatalogEvent::RequestFailed {
                        identifier,
                        reason: error.to_string(),
                    }),
                },
                Outcome::Absent | Outcome::Cancelled => {}
            }
        }

        if events.iter().any(|e| {
            matches!(
                e,
                CatalogEvent::RecordUpdated(_) | CatalogEvent::RecordDiscarded(_)
            )
        }) {
            self.rebuild_categories();
        }

        events
    }

    /// Poll on a fixed tick until no request is pending
    pub async fn drive_until_idle(&mut self, tick: Duration) -> Vec<CatalogEvent> {
        let mut events = Vec::new();
        loop {
            events.extend(self.poll_once());
            if !self.has_pending() {
                return events;
            }
            tokio::time::sleep(tick).await;
        }
    }

    /// Cancel every request, then persist the collection
    pub fn shutdown(&mut self) -> Result<()> {
        self.orchestrator.cancel_all();
        for record in self.records.values_mut() {
            record.active_download = None;
        }

        self.store.save(self.records.values())?;
        tracing::info!(
            "Saved {} repositories to {}",
            self.records.len(),
            self.store.path().display()
        );
        Ok(())
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Records in identifier order
    pub fn records(&self) -> impl Iterator<Item = &RepositoryRecord> {
        self.records.values()
    }

    pub fn record(&self, identifier: &str) -> Option<&RepositoryRecord> {
        self.records.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bucket names, `all` first
    pub fn categories(&self) -> &[String] {
        self.categories.names()
    }

    pub fn records_in_category(&self, category: &str) -> Vec<&RepositoryRecord> {
        self.categories
            .members(category)
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// See [`RepositoryRecord::download_progress`] for the unknown-length case
    pub fn download_progress(&self, identifier: &str) -> Option<f32> {
        self.records
            .get(identifier)
            .and_then(RepositoryRecord::download_progress)
    }

    pub fn has_pending(&self) -> bool {
        !self.orchestrator.is_idle()
    }

    pub fn pending_count(&self) -> usize {
        self.orchestrator.pending_count()
    }

    fn seed(&mut self, records: Vec<RepositoryRecord>) {
        for mut record in records {
            if let Some(entry) = self.config.entry(&record.identifier) {
                record.category = entry.category.clone();
            }
            match self.records.get_mut(&record.identifier) {
                // Keep a download that is already running
                Some(existing) => {
                    record.active_download = existing.active_download.take();
                    *existing = record;
                }
                None => {
                    self.records.insert(record.identifier.clone(), record);
                }
            }
        }
        self.rebuild_categories();
    }

    /// Clear the record's download only if it still points at this request
    fn release_download(&mut self, identifier: &str, id: RequestId) -> bool {
        match self.records.get_mut(identifier) {
            Some(record) if record.active_download.as_ref().map(RequestHandle::id) == Some(id) => {
                record.active_download = None;
                true
            }
            _ => false,
        }
    }

    fn apply_metadata(
        &mut self,
        identifier: String,
        response: FetchResponse,
        events: &mut Vec<CatalogEvent>,
    ) {
        let category = self
            .config
            .entry(&identifier)
            .map(|e| e.category.clone())
            .unwrap_or_default();

        if response.is_not_modified() {
            if let Some(record) = self.records.get_mut(&identifier) {
                record.category = category;
                let missing_icon = record.icon_bytes.is_none();
                events.push(CatalogEvent::RecordUnchanged(identifier.clone()));
                if missing_icon {
                    self.request_icon(&identifier);
                }
            }
            return;
        }

        let info: RepositoryInfo = match serde_json::from_slice(&response.body) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Ignoring unparseable metadata for {}: {}", identifier, e);
                events.push(CatalogEvent::RequestFailed {
                    identifier: Some(identifier),
                    reason: e.to_string(),
                });
                return;
            }
        };

        if info.private.unwrap_or(false) {
            tracing::warn!("Discarding private repository {}", identifier);
            if let Some(removed) = self.records.remove(&identifier) {
                if let Some(download) = removed.active_download {
                    download.cancel();
                }
            }
            events.push(CatalogEvent::RecordDiscarded(identifier));
            return;
        }

        let record = self
            .records
            .entry(identifier.clone())
            .or_insert_with(|| RepositoryRecord::new(identifier.clone()));
        record.display_name = info.name.unwrap_or_default();
        record.description = info.description.unwrap_or_default();
        record.archive_template_url = info.archive_url.unwrap_or_default();
        record.category = category;
        record.entity_tag = response.entity_tag;

        tracing::debug!("Updated metadata for {}", identifier);
        self.request_icon(&identifier);
        events.push(CatalogEvent::RecordUpdated(identifier));
    }

    fn request_icon(&mut self, identifier: &str) {
        let Some(icon_path) = self
            .config
            .entry(identifier)
            .and_then(|e| e.icon_path.as_deref())
        else {
            return;
        };

        let request = FetchRequest::get(contents_url(&self.config.api_base, identifier, icon_path))
            .header("accept", GITHUB_RAW)
            .optional();
        self.orchestrator
            .issue(request, CatalogCompletion::Icon, Some(identifier.to_string()));
    }

    fn apply_icon(
        &mut self,
        identifier: String,
        response: FetchResponse,
        events: &mut Vec<CatalogEvent>,
    ) {
        if response.is_not_modified() || response.body.is_empty() {
            return;
        }
        if let Some(record) = self.records.get_mut(&identifier) {
            record.icon_bytes = Some(response.body);
            events.push(CatalogEvent::IconAttached(identifier));
        }
    }

    fn apply_archive(
        &mut self,
        identifier: String,
        response: FetchResponse,
        events: &mut Vec<CatalogEvent>,
    ) {
        let Some(record) = self.records.get(&identifier) else {
            tracing::warn!("Archive for {} arrived after the record was removed", identifier);
            return;
        };

        let result = import_destination(&self.config.project_root, record).and_then(|destination| {
            import_archive(&response.body, &destination, &self.config.subtree_marker)
        });

        match result {
            Ok(summary) => events.push(CatalogEvent::Imported {
                identifier,
                summary,
            }),
            Err(e) => {
                tracing::error!("Import of {} failed: {}", identifier, e);
                events.push(CatalogEvent::ImportFailed {
                    identifier,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn rebuild_categories(&mut self) {
        self.categories = CategoryIndex::build(self.records.values());
    }
}

/// `<project_root>/<display name>`, falling back to the repository name
fn import_destination(project_root: &Path, record: &RepositoryRecord) -> Result<PathBuf> {
    let name = if record.display_name.is_empty() {
        record
            .identifier
            .rsplit('/')
            .next()
            .unwrap_or(&record.identifier)
    } else {
        record.display_name.as_str()
    };

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(project_root.join(name)),
        _ => Err(CatalogError::InvalidDestination(name.to_string())),
    }
}
