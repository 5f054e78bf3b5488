//! Service layer for github-catalog
//!
//! The orchestrator and transport move bytes; the cache store and archive
//! importer persist them; the catalog manager coordinates all of it.

pub mod archive_importer;
pub mod cache_store;
pub mod catalog_manager;
pub mod credentials_service;
pub mod orchestrator;
pub mod transport;

pub use archive_importer::{import_archive, ImportSummary};
pub use cache_store::{CacheSnapshot, CacheStore, CACHE_SCHEMA_VERSION};
pub use catalog_manager::{CatalogCompletion, CatalogEvent, CatalogManager};
pub use credentials_service::Credentials;
pub use orchestrator::{Orchestrator, Outcome, RequestHandle, RequestId, Resolved};
pub use transport::{FetchRequest, FetchResponse, HttpTransport, Progress, Transport};
