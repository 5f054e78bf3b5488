//! Request orchestrator
//!
//! Starts fetches on the tokio runtime without blocking the caller and hands
//! their results back through [`Orchestrator::poll_once`], which the owner calls
//! from its own tick. All bookkeeping happens on the caller's side of
//! `poll_once`, so the owner never needs a lock around its own state.
//!
//! Each request carries a completion value `T` chosen by the caller. It is
//! moved out exactly once, inside [`Outcome::Completed`], and only when the
//! request succeeded and was not cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::error::{CatalogError, Result};
use crate::services::transport::{FetchRequest, FetchResponse, Progress, Transport};

/// Identifies one issued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct HandleState {
    cancelled: AtomicBool,
    progress: Progress,
}

/// Caller-side view of an in-flight request: progress and cancellation
#[derive(Clone)]
pub struct RequestHandle {
    id: RequestId,
    state: Arc<HandleState>,
}

impl RequestHandle {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            state: Arc::new(HandleState {
                cancelled: AtomicBool::new(false),
                progress: Progress::default(),
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Fraction of the body received, `0.0..=1.0`
    pub fn progress(&self) -> f32 {
        self.state.progress.fraction()
    }

    /// Cancel the request; its completion will never be delivered
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("progress", &self.progress())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// How a request left the pending set
#[derive(Debug)]
pub enum Outcome<T> {
    /// 2xx or 304; the completion value is handed over exactly once
    Completed { response: FetchResponse, on_complete: T },
    /// Transport failure or unexpected status, already logged
    Failed(CatalogError),
    /// 404 on a request marked optional
    Absent,
    /// Cancelled through its handle before the result was consumed
    Cancelled,
}

/// A request removed from the pending set during a poll
#[derive(Debug)]
pub struct Resolved<T> {
    pub id: RequestId,
    pub correlation_key: Option<String>,
    pub outcome: Outcome<T>,
}

struct PendingRequest<T> {
    handle: RequestHandle,
    url: String,
    optional: bool,
    correlation_key: Option<String>,
    on_complete: T,
    receiver: oneshot::Receiver<Result<FetchResponse>>,
    task: JoinHandle<()>,
}

pub struct Orchestrator<T> {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    pending: Vec<PendingRequest<T>>,
    next_id: u64,
}

impl<T> Orchestrator<T> {
    pub fn new(transport: Arc<dyn Transport>, runtime: Handle) -> Self {
        Self {
            transport,
            runtime,
            pending: Vec::new(),
            next_id: 1,
        }
    }

    /// Start a fetch immediately and track it until the next poll that sees it finish
    pub fn issue(
        &mut self,
        request: FetchRequest,
        on_complete: T,
        correlation_key: Option<String>,
    ) -> RequestHandle {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let handle = RequestHandle::new(id);
        let (sender, receiver) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&handle.state);
        let url = request.url.clone();
        let optional = request.optional;

        tracing::debug!("Issuing request {} GET {}", id, url);

        let task = self.runtime.spawn(async move {
            let result = transport.fetch(request, &state.progress).await;
            // The receiver is gone once the request was dropped
            let _ = sender.send(result);
        });

        self.pending.push(PendingRequest {
            handle: handle.clone(),
            url,
            optional,
            correlation_key,
            on_complete,
            receiver,
            task,
        });

        handle
    }

    /// Remove every finished or cancelled request and report how each one ended
    pub fn poll_once(&mut self) -> Vec<Resolved<T>> {
        let mut resolved = Vec::new();
        let mut still_pending = Vec::with_capacity(self.pending.len());

        for mut request in self.pending.drain(..) {
            if request.handle.is_cancelled() {
                request.task.abort();
                tracing::debug!("Request {} cancelled", request.handle.id);
                resolved.push(Resolved {
                    id: request.handle.id,
                    correlation_key: request.correlation_key,
                    outcome: Outcome::Cancelled,
                });
                continue;
            }

            let result = match request.receiver.try_recv() {
                Ok(result) => result,
                Err(TryRecvError::Empty) => {
                    still_pending.push(request);
                    continue;
                }
                Err(TryRecvError::Closed) => Err(CatalogError::Runtime(format!(
                    "request task for {} ended without a result",
                    request.url
                ))),
            };

            let id = request.handle.id;
            let outcome = match result {
                Ok(response) if response.is_success() || response.is_not_modified() => {
                    Outcome::Completed {
                        response,
                        on_complete: request.on_complete,
                    }
                }
                Ok(response) if response.status == 404 && request.optional => {
                    tracing::debug!("Optional resource absent: {}", request.url);
                    Outcome::Absent
                }
                Ok(response) => {
                    let error = CatalogError::HttpStatus {
                        status: response.status,
                        url: request.url,
                    };
                    tracing::error!("Request {} failed: {}", id, error);
                    Outcome::Failed(error)
                }
                Err(error) => {
                    tracing::error!("Request {} GET {} failed: {}", id, request.url, error);
                    Outcome::Failed(error)
                }
            };

            resolved.push(Resolved {
                id,
                correlation_key: request.correlation_key,
                outcome,
            });
        }

        self.pending = still_pending;
        resolved
    }

    /// Abort and drop every pending request without delivering any completion
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for request in self.pending.drain(..) {
            request.handle.cancel();
            request.task.abort();
        }
        if count > 0 {
            tracing::info!("Cancelled {} pending request(s)", count);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Handles of the requests still in flight
    pub fn handles(&self) -> impl Iterator<Item = &RequestHandle> {
        self.pending.iter().map(|r| &r.handle)
    }
}

impl<T> Drop for Orchestrator<T> {
    fn drop(&mut self) {
        for request in &self.pending {
            request.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTransport, Reply};
    use std::time::Duration;

    fn orchestrator(transport: &Arc<FakeTransport>) -> Orchestrator<&'static str> {
        Orchestrator::new(transport.clone(), Handle::current())
    }

    /// Poll until nothing is pending, collecting every resolution
    async fn settle<T>(orchestrator: &mut Orchestrator<T>) -> Vec<Resolved<T>> {
        let mut all = Vec::new();
        for _ in 0..200 {
            all.extend(orchestrator.poll_once());
            if orchestrator.is_idle() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        all
    }

    #[tokio::test]
    async fn test_success_delivers_completion_once() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/a", Reply::Ok(FetchResponse::ok("hello")));
        let mut orch = orchestrator(&transport);

        let handle = orch.issue(FetchRequest::get("https://x/a"), "a", Some("owner/a".into()));
        let resolved = settle(&mut orch).await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, handle.id());
        assert_eq!(resolved[0].correlation_key.as_deref(), Some("owner/a"));
        match &resolved[0].outcome {
            Outcome::Completed {
                response,
                on_complete,
            } => {
                assert_eq!(response.body, b"hello");
                assert_eq!(*on_complete, "a");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Nothing more is ever delivered for that request
        assert!(orch.poll_once().is_empty());
        assert!(orch.is_idle());
    }

    #[tokio::test]
    async fn test_error_status_is_dropped_without_completion() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/a", Reply::Ok(FetchResponse::status(500)));
        let mut orch = orchestrator(&transport);

        orch.issue(FetchRequest::get("https://x/a"), "a", None);
        let resolved = settle(&mut orch).await;

        assert_eq!(resolved.len(), 1);
        assert!(matches!(
            resolved[0].outcome,
            Outcome::Failed(CatalogError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_failed() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/a", Reply::Err("connection reset".into()));
        let mut orch = orchestrator(&transport);

        orch.issue(FetchRequest::get("https://x/a"), "a", None);
        let resolved = settle(&mut orch).await;
        assert!(matches!(resolved[0].outcome, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_optional_404_is_absent() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/icon", Reply::Ok(FetchResponse::status(404)));
        transport.respond("https://x/required", Reply::Ok(FetchResponse::status(404)));
        let mut orch = orchestrator(&transport);

        let optional = orch.issue(FetchRequest::get("https://x/icon").optional(), "icon", None);
        orch.issue(FetchRequest::get("https://x/required"), "required", None);
        let resolved = settle(&mut orch).await;

        assert_eq!(resolved.len(), 2);
        for r in &resolved {
            if r.id == optional.id() {
                assert!(matches!(r.outcome, Outcome::Absent));
            } else {
                assert!(matches!(r.outcome, Outcome::Failed(_)));
            }
        }
    }

    #[tokio::test]
    async fn test_not_modified_is_completed() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/a", Reply::Ok(FetchResponse::status(304)));
        let mut orch = orchestrator(&transport);

        orch.issue(FetchRequest::get("https://x/a"), "a", None);
        let resolved = settle(&mut orch).await;
        assert!(matches!(resolved[0].outcome, Outcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_all_suppresses_late_completion() {
        let transport = Arc::new(FakeTransport::new());
        let gate = transport.gated("https://x/slow", FetchResponse::ok("late"));
        let mut orch = orchestrator(&transport);

        orch.issue(FetchRequest::get("https://x/slow"), "slow", None);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(orch.poll_once().is_empty());

        assert_eq!(orch.cancel_all(), 1);
        // The fake would now complete, but nobody is listening any more
        gate.open();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(orch.poll_once().is_empty());
        assert!(orch.is_idle());
    }

    #[tokio::test]
    async fn test_handle_cancel_wins_over_finished_result() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond("https://x/a", Reply::Ok(FetchResponse::ok("done")));
        let mut orch = orchestrator(&transport);

        let handle = orch.issue(FetchRequest::get("https://x/a"), "a", None);
        // Let the fetch finish before cancelling
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();

        let resolved = orch.poll_once();
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0].outcome, Outcome::Cancelled));
        assert!(orch.is_idle());
    }

    #[tokio::test]
    async fn test_progress_reported_through_handle() {
        let transport = Arc::new(FakeTransport::new());
        let gate = transport.gated("https://x/big", FetchResponse::ok(vec![0u8; 64]));
        let mut orch = orchestrator(&transport);

        let handle = orch.issue(FetchRequest::get("https://x/big"), "big", None);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!((handle.progress() - 0.5).abs() < f32::EPSILON);

        gate.open();
        let resolved = settle(&mut orch).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(handle.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_issue_does_not_block() {
        let transport = Arc::new(FakeTransport::new());
        let _gate = transport.gated("https://x/slow", FetchResponse::ok("x"));
        let mut orch = orchestrator(&transport);

        orch.issue(FetchRequest::get("https://x/slow"), "a", None);
        orch.issue(FetchRequest::get("https://x/slow"), "b", None);
        assert_eq!(orch.pending_count(), 2);
        assert_eq!(orch.handles().count(), 2);
        orch.cancel_all();
    }
}
