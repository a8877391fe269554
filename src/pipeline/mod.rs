//! Per-URL handlers for the two tiers and the persistence step they share.

pub mod fast;
pub mod render;

use crate::document::ContentDocument;
use crate::stats::PhaseCounters;
use crate::store::DocumentStore;
use tracing::{debug, error, warn};

/// Validates and appends a document. Returns whether it was written.
pub(crate) async fn persist(
    store: &dyn DocumentStore,
    collection: &str,
    counters: &PhaseCounters,
    document: ContentDocument,
) -> bool {
    if let Err(err) = document.validate() {
        warn!(url = %document.url, error = %err, "document failed validation, dropped");
        counters.record_rejected();
        return false;
    }
    match store.append(collection, &document).await {
        Ok(()) => {
            debug!(
                url = %document.url,
                mode = %document.render_mode,
                fingerprint = %document.fingerprint,
                "document persisted"
            );
            counters.record_persisted();
            true
        }
        Err(err) => {
            error!(url = %document.url, error = %err, "store append failed");
            false
        }
    }
}
