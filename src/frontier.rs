//! Frontier coordination: a bounded, deduplicating request queue with in-flight tracking.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Default bounded queue depth for the frontier.
pub const DEFAULT_FRONTIER_QUEUE: usize = 16_384;

/// Extra routing data attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMarker {
    /// The fast tier deferred this URL; it must go through the browser.
    NeedsRender,
}

/// A unit of work handed to a pipeline worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierRequest {
    url: String,
    unique_key: String,
    depth: u8,
    marker: Option<RequestMarker>,
}

impl FrontierRequest {
    /// A request whose dedupe key is the URL itself.
    pub fn new(url: impl Into<String>, depth: u8) -> Self {
        let url = url.into();
        Self {
            unique_key: url.clone(),
            url,
            depth,
            marker: None,
        }
    }

    /// Overrides the dedupe key.
    pub fn with_key(mut self, unique_key: impl Into<String>) -> Self {
        self.unique_key = unique_key.into();
        self
    }

    /// Attaches a routing marker.
    pub fn with_marker(mut self, marker: RequestMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Key used for deduplication.
    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    /// Link depth from the seed.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Routing marker, if any.
    pub fn marker(&self) -> Option<RequestMarker> {
        self.marker
    }
}

impl fmt::Display for FrontierRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Errors that can emerge while queueing requests; the request is handed back.
#[derive(Debug, Error)]
pub enum FrontierError {
    /// The queue is full.
    #[error("frontier queue full, rejected {0}")]
    QueueFull(FrontierRequest),
    /// The unique key was already admitted during this run.
    #[error("duplicate request key {}", .0.unique_key())]
    Duplicate(FrontierRequest),
    /// The frontier is closed between phases.
    #[error("frontier closed, rejected {0}")]
    Closed(FrontierRequest),
}

impl FrontierError {
    /// Recovers the rejected request.
    pub fn into_request(self) -> FrontierRequest {
        match self {
            Self::QueueFull(request) | Self::Duplicate(request) | Self::Closed(request) => request,
        }
    }
}

#[derive(Default)]
struct FrontierState {
    queue: VecDeque<FrontierRequest>,
    admitted: HashSet<String>,
}

/// A cooperative frontier shared by the workers of one phase.
pub struct Frontier {
    state: Mutex<FrontierState>,
    capacity: usize,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

impl Frontier {
    /// Constructs an empty frontier holding at most `capacity` queued requests.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(FrontierState::default()),
            capacity: capacity.max(1),
            pending: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Number of requests waiting inside the queue.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of requests currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the frontier currently rejects new work.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues a request unless its key was seen before or the queue is full.
    pub async fn push(&self, request: FrontierRequest) -> Result<(), FrontierError> {
        if self.is_closed() {
            return Err(FrontierError::Closed(request));
        }

        let mut state = self.state.lock().await;
        if state.admitted.contains(request.unique_key()) {
            return Err(FrontierError::Duplicate(request));
        }
        if state.queue.len() >= self.capacity {
            return Err(FrontierError::QueueFull(request));
        }
        state.admitted.insert(request.unique_key().to_string());
        state.queue.push_back(request);
        self.pending.fetch_add(1, Ordering::SeqCst);
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn try_next(&self) -> Option<FrontierRequest> {
        let mut state = self.state.lock().await;
        let next = state.queue.pop_front();
        if next.is_some() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        next
    }

    /// Waits for a request, or returns `None` once the frontier is closed and empty.
    pub async fn next_request(&self) -> Option<InFlight<'_>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(request) = self.try_next().await {
                return Some(InFlight {
                    frontier: self,
                    request,
                });
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    fn is_idle(&self) -> bool {
        self.pending() == 0 && self.in_flight() == 0
    }

    /// Resolves once the queue is empty and no request is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Rejects further pushes and releases idle workers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Accepts pushes again. Previously admitted keys stay admitted.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTIER_QUEUE)
    }
}

/// A request checked out by a worker; counts as in flight until dropped.
pub struct InFlight<'a> {
    frontier: &'a Frontier,
    request: FrontierRequest,
}

impl InFlight<'_> {
    /// The checked-out request.
    pub fn request(&self) -> &FrontierRequest {
        &self.request
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.frontier.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_keys_rejected() {
        let frontier = Frontier::new(4);
        frontier
            .push(FrontierRequest::new("https://dup.test", 0))
            .await
            .expect("first push");

        match frontier
            .push(FrontierRequest::new("https://dup.test", 1))
            .await
            .expect_err("duplicate rejected")
        {
            FrontierError::Duplicate(request) => assert_eq!(request.depth(), 1),
            other => panic!("expected duplicate error, got {other:?}"),
        }

        frontier
            .push(FrontierRequest::new("https://dup.test", 0).with_key("render:https://dup.test"))
            .await
            .expect("distinct key admitted");
        assert_eq!(frontier.pending(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_hands_request_back() {
        let frontier = Frontier::new(1);
        frontier.push(FrontierRequest::new("https://a.test", 0)).await.unwrap();
        let err = frontier
            .push(FrontierRequest::new("https://b.test", 0))
            .await
            .expect_err("queue full");
        assert!(matches!(err, FrontierError::QueueFull(_)));
        assert_eq!(err.into_request().url(), "https://b.test");

        // A rejected key was never admitted, so it can be retried later.
        let lease = frontier.next_request().await.unwrap();
        drop(lease);
        frontier.push(FrontierRequest::new("https://b.test", 0)).await.unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn requests_leave_in_fifo_order() {
        let frontier = Frontier::new(8);
        for url in ["https://1.test", "https://2.test", "https://3.test"] {
            frontier.push(FrontierRequest::new(url, 0)).await.unwrap();
        }
        let mut order = Vec::new();
        while frontier.pending() > 0 {
            let lease = frontier.next_request().await.unwrap();
            order.push(lease.request().url().to_string());
        }
        assert_eq!(order, vec!["https://1.test", "https://2.test", "https://3.test"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn idle_waits_for_leases_to_drop() {
        let frontier = Frontier::new(4);
        frontier.push(FrontierRequest::new("https://a.test", 0)).await.unwrap();
        let lease = frontier.next_request().await.unwrap();
        assert_eq!(frontier.pending(), 0);
        assert_eq!(frontier.in_flight(), 1);

        assert!(timeout(Duration::from_millis(20), frontier.wait_idle())
            .await
            .is_err());

        let (_, ()) = tokio::join!(frontier.wait_idle(), async move {
            tokio::task::yield_now().await;
            drop(lease);
        });
        assert_eq!(frontier.in_flight(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_releases_waiting_workers_and_reopen_accepts_work() {
        let frontier = Frontier::new(4);
        let (next, ()) = tokio::join!(frontier.next_request(), async {
            tokio::task::yield_now().await;
            frontier.close();
        });
        assert!(next.is_none());

        let err = frontier
            .push(FrontierRequest::new("https://late.test", 0))
            .await
            .expect_err("closed");
        assert!(matches!(err, FrontierError::Closed(_)));

        frontier.reopen();
        frontier
            .push(FrontierRequest::new("https://late.test", 0).with_marker(RequestMarker::NeedsRender))
            .await
            .expect("reopened");
        let lease = frontier.next_request().await.unwrap();
        assert_eq!(lease.request().marker(), Some(RequestMarker::NeedsRender));
    }
}
