//! HTTP transport for catalog requests
//!
//! The orchestrator only sees the [`Transport`] trait. [`HttpTransport`] is the
//! `reqwest` implementation used outside of tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH};

use crate::error::Result;
use crate::models::CatalogConfig;
use crate::services::credentials_service::Credentials;

/// Accept header for GitHub JSON endpoints
pub const GITHUB_JSON: &str = "application/vnd.github+json";

/// Accept header asking the contents API for the raw file
pub const GITHUB_RAW: &str = "application/vnd.github.v3.raw";

/// An outbound GET
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// A 404 means the resource is absent rather than an error
    pub optional: bool,
    /// Entity tag for a conditional request
    pub if_none_match: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            optional: false,
            if_none_match: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn if_none_match(mut self, entity_tag: Option<String>) -> Self {
        self.if_none_match = entity_tag;
        self
    }
}

/// A finished HTTP exchange, whatever its status
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub entity_tag: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            entity_tag: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_entity_tag(mut self, entity_tag: impl Into<String>) -> Self {
        self.entity_tag = Some(entity_tag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Byte counters shared between a running fetch and its request handle
#[derive(Debug, Default)]
pub struct Progress {
    received: AtomicU64,
    total: AtomicU64,
    finished: AtomicBool,
}

impl Progress {
    /// Record the expected body length, `None` when the server did not send one
    pub fn set_total(&self, total: Option<u64>) {
        self.total.store(total.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn advance(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Completion in `0.0..=1.0`; stays at 0 until finished when the length is unknown
    pub fn fraction(&self) -> f32 {
        if self.finished.load(Ordering::Acquire) {
            return 1.0;
        }
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.received() as f64 / total as f64).min(1.0) as f32
    }
}

/// Executes one GET and reports body progress
#[async_trait]
pub trait Transport: Send + Sync {
    /// Non-2xx statuses are returned as responses; only transport failures are errors
    async fn fetch(&self, request: FetchRequest, progress: &Progress) -> Result<FetchResponse>;
}

/// `reqwest` backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    authorization: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &CatalogConfig, credentials: Option<&Credentials>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            authorization: credentials.map(Credentials::authorization_header),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest, progress: &Progress) -> Result<FetchResponse> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(entity_tag) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, entity_tag.as_str());
        }
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.as_str());
        }
        if !request.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("accept")) {
            builder = builder.header(ACCEPT, GITHUB_JSON);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let entity_tag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        progress.set_total(response.content_length());
        tracing::debug!("GET {} -> {}", request.url, status);

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            progress.advance(chunk.len() as u64);
            body.extend_from_slice(&chunk);
        }
        progress.finish();

        Ok(FetchResponse {
            status,
            entity_tag,
            body,
        })
    }
}

/// `GET /repos/{owner}/{name}`
pub fn repository_url(api_base: &str, identifier: &str) -> String {
    format!("{}/repos/{}", api_base.trim_end_matches('/'), identifier)
}

/// `GET /repos/{owner}/{name}/contents/{path}` with each path segment encoded
pub fn contents_url(api_base: &str, identifier: &str, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();

    format!(
        "{}/contents/{}",
        repository_url(api_base, identifier),
        encoded.join("/")
    )
}
