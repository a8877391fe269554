//! Work routing between the two tiers, with the request budget and the drain barrier.

use crate::frontier::{Frontier, FrontierError, FrontierRequest, RequestMarker};
use futures_util::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::trace;

/// Prefix that separates render-tier keys from fast-tier keys.
pub const RENDER_KEY_PREFIX: &str = "render:";

/// Dedupe key for a URL re-queued for the render tier.
pub fn render_key(url: &str) -> String {
    format!("{RENDER_KEY_PREFIX}{url}")
}

/// Reasons the router refused a request.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The run's request budget is used up.
    #[error("request budget exhausted, dropped {0}")]
    BudgetExhausted(String),
    /// The frontier rejected the request.
    #[error(transparent)]
    Frontier(#[from] FrontierError),
}

impl RouterError {
    /// Duplicate keys are routine when pages link to each other.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Frontier(FrontierError::Duplicate(_)))
    }
}

/// Owns the frontier and the request budget shared by both phases.
pub struct WorkRouter {
    frontier: Frontier,
    remaining: AtomicUsize,
}

impl WorkRouter {
    /// Router admitting at most `max_requests` requests and `capacity` queued at once.
    pub fn new(max_requests: usize, capacity: usize) -> Self {
        Self {
            frontier: Frontier::new(capacity),
            remaining: AtomicUsize::new(max_requests),
        }
    }

    /// Requests the budget still allows.
    pub fn remaining_budget(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Underlying frontier.
    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// Queues a fast-tier request keyed by its URL.
    pub async fn enqueue(&self, url: &str, depth: u8) -> Result<(), RouterError> {
        self.admit(FrontierRequest::new(url, depth)).await
    }

    /// Queues a request under an explicit key with optional marker data.
    pub async fn enqueue_with_key(
        &self,
        url: &str,
        unique_key: &str,
        depth: u8,
        marker: Option<RequestMarker>,
    ) -> Result<(), RouterError> {
        let mut request = FrontierRequest::new(url, depth).with_key(unique_key);
        if let Some(marker) = marker {
            request = request.with_marker(marker);
        }
        self.admit(request).await
    }

    /// Queues a deferred URL for the render tier.
    pub async fn enqueue_fallback(&self, url: &str) -> Result<(), RouterError> {
        self.enqueue_with_key(url, &render_key(url), 0, Some(RequestMarker::NeedsRender))
            .await
    }

    async fn admit(&self, request: FrontierRequest) -> Result<(), RouterError> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
        {
            return Err(RouterError::BudgetExhausted(request.url().to_string()));
        }
        if let Err(err) = self.frontier.push(request).await {
            self.remaining.fetch_add(1, Ordering::SeqCst);
            return Err(err.into());
        }
        Ok(())
    }

    /// Opens the frontier for the next phase.
    pub fn reopen(&self) {
        self.frontier.reopen();
    }

    /// Runs `concurrency` workers until the queue is empty and nothing is in flight.
    ///
    /// Handlers may enqueue more work; the barrier only resolves once that work
    /// has drained as well. The frontier is closed on return.
    pub async fn drain<F, Fut>(&self, concurrency: usize, handler: F)
    where
        F: Fn(FrontierRequest) -> Fut,
        Fut: Future<Output = ()>,
    {
        let handler = &handler;
        let workers = (0..concurrency.max(1)).map(|worker| async move {
            let mut handled = 0usize;
            while let Some(lease) = self.frontier.next_request().await {
                handler(lease.request().clone()).await;
                handled += 1;
                drop(lease);
            }
            trace!(worker, handled, "worker drained");
        });

        let watcher = async {
            self.frontier.wait_idle().await;
            self.frontier.close();
        };

        tokio::join!(join_all(workers), watcher);
    }
}
