//! Test utilities: a scripted transport and zip archive builders

#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{CatalogError, Result};
use crate::services::transport::{FetchRequest, FetchResponse, Progress, Transport};

/// Scripted answer for a URL
#[derive(Clone)]
pub enum Reply {
    Ok(FetchResponse),
    Err(String),
    /// Reports half the body, then waits for the gate before finishing
    Gated(FetchResponse, watch::Receiver<bool>),
}

/// Opens a gated reply
pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

/// In-memory transport answering from a URL table and recording every request.
///
/// Queued replies are handed out first, one per request, before the table.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, Reply>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    /// Answer `url` with `response` once the returned gate is opened
    pub fn gated(&self, url: &str, response: FetchResponse) -> Gate {
        let (sender, receiver) = watch::channel(false);
        self.respond(url, Reply::Gated(response, receiver));
        Gate(sender)
    }

    /// Answer the next request for `url` with `response` once the gate opens
    pub fn enqueue_gated(&self, url: &str, response: FetchResponse) -> Gate {
        let (sender, receiver) = watch::channel(false);
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Reply::Gated(response, receiver));
        Gate(sender)
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, request: FetchRequest, progress: &Progress) -> Result<FetchResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&url)
            .and_then(VecDeque::pop_front);
        let reply = queued.or_else(|| self.replies.lock().unwrap().get(&url).cloned());

        match reply {
            Some(Reply::Ok(response)) => {
                progress.set_total(Some(response.body.len() as u64));
                progress.advance(response.body.len() as u64);
                progress.finish();
                Ok(response)
            }
            Some(Reply::Err(message)) => Err(CatalogError::Custom(message)),
            Some(Reply::Gated(response, mut gate)) => {
                let len = response.body.len() as u64;
                progress.set_total(Some(len));
                progress.advance(len / 2);
                let _ = gate.wait_for(|open| *open).await;
                progress.advance(len - len / 2);
                progress.finish();
                Ok(response)
            }
            None => Ok(FetchResponse::status(404)),
        }
    }
}

/// Build a zip in memory; names ending in `/` become directory entries
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("Failed to add directory");
        } else {
            zip.start_file(*name, options).expect("Failed to start file");
            zip.write_all(content).expect("Failed to write entry");
        }
    }

    zip.finish().expect("Failed to finish zip").into_inner()
}

/// GitHub-style `/repos/{id}` body
pub fn repo_json(name: &str, description: Option<&str>, private: bool) -> Vec<u8> {
    serde_json::json!({
        "name": name,
        "full_name": format!("owner/{}", name),
        "description": description,
        "archive_url": format!(
            "https://api.github.com/repos/owner/{}/{{archive_format}}{{/ref}}",
            name
        ),
        "private": private,
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_zip_lists_entries() {
        let bytes = build_zip(&[("root/", b""), ("root/a.txt", b"a")]);
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_repo_json_placeholders() {
        let body: serde_json::Value =
            serde_json::from_slice(&repo_json("tools", None, false)).unwrap();
        assert_eq!(
            body["archive_url"],
            "https://api.github.com/repos/owner/tools/{archive_format}{/ref}"
        );
        assert!(body["description"].is_null());
    }

    #[tokio::test]
    async fn test_fake_transport_records_requests() {
        let transport = FakeTransport::new();
        transport.respond("https://x/a", Reply::Ok(FetchResponse::ok("a")));
        let progress = Progress::default();

        let response = transport
            .fetch(FetchRequest::get("https://x/a"), &progress)
            .await
            .unwrap();
        assert_eq!(response.body, b"a");

        let missing = transport
            .fetch(FetchRequest::get("https://x/missing"), &progress)
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.request_count("https://x/a"), 1);
    }

    #[tokio::test]
    async fn test_queued_replies_come_first_in_order() {
        let transport = FakeTransport::new();
        transport.respond("https://x/a", Reply::Ok(FetchResponse::ok("table")));
        transport.enqueue_gated("https://x/a", FetchResponse::ok("one")).open();
        transport.enqueue_gated("https://x/a", FetchResponse::ok("two")).open();
        let progress = Progress::default();

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let response = transport
                .fetch(FetchRequest::get("https://x/a"), &progress)
                .await
                .unwrap();
            bodies.push(String::from_utf8(response.body).unwrap());
        }
        assert_eq!(bodies, ["one", "two", "table"]);
    }
}
