//! Error types for github-catalog

use serde::Serialize;
use thiserror::Error;

/// Catalog error types
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Download already in progress for {0}")]
    AlreadyInFlight(String),

    #[error("Unknown repository: {0}")]
    UnknownRecord(String),

    #[error("Archive entry escapes the target directory: {0}")]
    UnsafeEntryPath(String),

    #[error("Failed to extract {entry}: {source}")]
    EntryFailed {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid import destination: {0}")]
    InvalidDestination(String),

    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    #[error("{0}")]
    Custom(String),
}

impl CatalogError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Io(_) => "IO_ERROR",
            CatalogError::Serialization(_) => "SERIALIZATION_ERROR",
            CatalogError::Archive(_) => "MALFORMED_ARCHIVE",
            CatalogError::Http(_) => "TRANSPORT_ERROR",
            CatalogError::HttpStatus { .. } => "HTTP_STATUS",
            CatalogError::Config(_) => "CONFIG_ERROR",
            CatalogError::AlreadyInFlight(_) => "ALREADY_IN_FLIGHT",
            CatalogError::UnknownRecord(_) => "UNKNOWN_RECORD",
            CatalogError::UnsafeEntryPath(_) => "UNSAFE_ENTRY_PATH",
            CatalogError::EntryFailed { .. } => "ENTRY_FAILED",
            CatalogError::InvalidDestination(_) => "INVALID_DESTINATION",
            CatalogError::Runtime(_) => "RUNTIME_ERROR",
            CatalogError::Custom(_) => "CUSTOM_ERROR",
        }
    }
}

/// Serializable error response for a presentation surface
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<&CatalogError> for ErrorResponse {
    fn from(error: &CatalogError) -> Self {
        let details = match error {
            CatalogError::EntryFailed { entry, .. } => Some(entry.clone()),
            CatalogError::HttpStatus { url, .. } => Some(url.clone()),
            _ => None,
        };

        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

impl serde::Serialize for CatalogError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

/// Result type alias for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;
