//! API credentials
//!
//! A pre-obtained credential string (typically `user:token`) read from a local
//! file and sent as a Basic authorization header on every request.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::path::Path;

use crate::error::Result;

#[derive(Clone)]
pub struct Credentials {
    secret: String,
}

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read credentials from a file; a missing or blank file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!("No credentials file at {}", path.display());
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)?;
        let secret = contents.trim();
        if secret.is_empty() {
            tracing::warn!("Credentials file {} is empty", path.display());
            return Ok(None);
        }

        Ok(Some(Self::new(secret)))
    }

    /// `Basic <base64(secret)>`
    pub fn authorization_header(&self) -> String {
        format!("Basic {}", BASE64.encode(self.secret.as_bytes()))
    }
}

// Keep the secret out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("secret", &"***").finish()
    }
}
