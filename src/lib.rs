#![warn(missing_docs)]
//! Core library entry points for the fastharvest content harvester.
//!
//! A run fetches every seed statically first. Pages whose static parse lacks
//! the required fields are deferred, and only after the whole fast phase has
//! drained are they re-queued for a headless browser.

pub mod controls;
pub mod document;
pub mod dom;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod judge;
pub mod pipeline;
pub mod render;
pub mod router;
pub mod runtime;
pub mod stats;
pub mod store;

pub use controls::{Cli, ConfigError, HarvestControls};
pub use document::{ContentDocument, RenderMode, ValidationError};
pub use dom::{DomAccess, DomError, ElementHandle, StaticDom};
pub use extract::{extract_document, ExtractionInput, FieldSelector};
pub use fetch::{FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use frontier::{Frontier, FrontierError, FrontierRequest, RequestMarker, DEFAULT_FRONTIER_QUEUE};
pub use judge::{CompletenessSpec, Verdict};
pub use render::{ChromeRenderer, PageRenderer, RenderError, RenderSettings, RenderedDom, RenderedPage};
pub use router::{RouterError, WorkRouter};
pub use runtime::{harvest, run as run_harvest, HarvestError, RunReport};
pub use stats::{RunStats, StatsError};
pub use store::{DocumentStore, JsonlStore, MemoryStore, StoreError};
