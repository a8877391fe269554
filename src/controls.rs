//! Harvest knobs shared by the library entry point and the CLI.

use crate::extract::FieldSelector;
use crate::judge::{CompletenessParseError, CompletenessSpec};
use crate::render::RenderSettings;
use crate::store::validate_collection;
use clap::Parser;
use scraper::Selector;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Upper bound on seeds accepted for one run.
pub const MAX_SEEDS: usize = 10_000;

/// Run-fatal configuration problems, reported before any pipeline starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No seed URLs were supplied.
    #[error("at least one seed url is required")]
    NoSeeds,
    /// More than [`MAX_SEEDS`] seeds.
    #[error("{0} seeds given, at most {MAX_SEEDS} allowed")]
    TooManySeeds(usize),
    /// A seed is not an absolute http(s) URL.
    #[error("invalid seed `{seed}`: {reason}")]
    InvalidSeed {
        /// Seed as given.
        seed: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A concurrency limit was zero.
    #[error("{0} concurrency must be at least 1")]
    ZeroConcurrency(&'static str),
    /// The request budget was zero.
    #[error("max requests must be at least 1")]
    ZeroBudget,
    /// The fallback list could hold nothing.
    #[error("fallback capacity must be at least 1")]
    ZeroFallbackCapacity,
    /// Politeness bounds are reversed.
    #[error("politeness range {min}..={max} ms is empty")]
    PolitenessRange {
        /// Lower bound in milliseconds.
        min: u64,
        /// Upper bound in milliseconds.
        max: u64,
    },
    /// The collection name cannot be used as a store key.
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),
    /// A custom field selector does not parse as CSS.
    #[error("invalid selector for field `{name}`: {selector}")]
    InvalidFieldSelector {
        /// Field name.
        name: String,
        /// Selector as given.
        selector: String,
    },
    /// Required completeness fields were malformed.
    #[error(transparent)]
    Completeness(#[from] CompletenessParseError),
    /// The seed file could not be read.
    #[error("failed to read seed file {path}: {source}")]
    SeedFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Tunable knobs that bound one harvest run.
#[derive(Clone, Debug)]
pub struct HarvestControls {
    seeds: Vec<String>,
    max_requests: usize,
    fast_concurrency: usize,
    render_concurrency: usize,
    fetch_timeout: Duration,
    load_settle_timeout: Duration,
    consent_timeout: Duration,
    politeness_ms: RangeInclusive<u64>,
    fallback_capacity: usize,
    collection: String,
    completeness: CompletenessSpec,
    max_depth: u8,
    field_selectors: Vec<FieldSelector>,
}

impl HarvestControls {
    /// Defaults around the given seeds.
    pub fn new<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Total requests admitted across both tiers.
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Worker counts for the fast and render tiers.
    pub fn with_concurrency(mut self, fast: usize, render: usize) -> Self {
        self.fast_concurrency = fast;
        self.render_concurrency = render;
        self
    }

    /// Static fetch and navigation timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Bound on the render tier's load-settled wait.
    pub fn with_load_settle_timeout(mut self, timeout: Duration) -> Self {
        self.load_settle_timeout = timeout;
        self
    }

    /// Bound on consent-overlay probing.
    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    /// Random delay before each render navigation, in milliseconds.
    pub fn with_politeness_ms(mut self, range: RangeInclusive<u64>) -> Self {
        self.politeness_ms = range;
        self
    }

    /// Deferred URLs kept for the render tier.
    pub fn with_fallback_capacity(mut self, capacity: usize) -> Self {
        self.fallback_capacity = capacity;
        self
    }

    /// Store collection receiving documents.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Fields the fast tier must extract to skip rendering.
    pub fn with_completeness(mut self, completeness: CompletenessSpec) -> Self {
        self.completeness = completeness;
        self
    }

    /// Internal link depth followed by the fast tier.
    pub fn with_max_depth(mut self, max_depth: u8) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Custom `name=css` fields.
    pub fn with_field_selectors(mut self, selectors: Vec<FieldSelector>) -> Self {
        self.field_selectors = selectors;
        self
    }

    /// Seed URLs.
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    /// Request budget shared by both tiers.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Fast tier worker count.
    pub fn fast_concurrency(&self) -> usize {
        self.fast_concurrency
    }

    /// Render tier worker count.
    pub fn render_concurrency(&self) -> usize {
        self.render_concurrency
    }

    /// Static fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Load-settled wait bound.
    pub fn load_settle_timeout(&self) -> Duration {
        self.load_settle_timeout
    }

    /// Consent probing bound.
    pub fn consent_timeout(&self) -> Duration {
        self.consent_timeout
    }

    /// Politeness delay range in milliseconds.
    pub fn politeness_ms(&self) -> RangeInclusive<u64> {
        self.politeness_ms.clone()
    }

    /// Fallback list capacity.
    pub fn fallback_capacity(&self) -> usize {
        self.fallback_capacity
    }

    /// Store collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Completeness requirements.
    pub fn completeness(&self) -> &CompletenessSpec {
        &self.completeness
    }

    /// Internal link depth.
    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Custom field selectors.
    pub fn field_selectors(&self) -> &[FieldSelector] {
        &self.field_selectors
    }

    /// Checks every knob; any error aborts the run before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::NoSeeds);
        }
        if self.seeds.len() > MAX_SEEDS {
            return Err(ConfigError::TooManySeeds(self.seeds.len()));
        }
        for seed in &self.seeds {
            validate_seed(seed)?;
        }
        if self.fast_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency("fast"));
        }
        if self.render_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency("render"));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if self.fallback_capacity == 0 {
            return Err(ConfigError::ZeroFallbackCapacity);
        }
        if self.politeness_ms.is_empty() {
            return Err(ConfigError::PolitenessRange {
                min: *self.politeness_ms.start(),
                max: *self.politeness_ms.end(),
            });
        }
        if validate_collection(&self.collection).is_err() {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }
        for field in &self.field_selectors {
            if Selector::parse(field.selector()).is_err() {
                return Err(ConfigError::InvalidFieldSelector {
                    name: field.name().to_string(),
                    selector: field.selector().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for HarvestControls {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_requests: 1_000,
            fast_concurrency: 8,
            render_concurrency: 2,
            fetch_timeout: Duration::from_secs(15),
            load_settle_timeout: Duration::from_secs(10),
            consent_timeout: Duration::from_millis(1_500),
            politeness_ms: 200..=600,
            fallback_capacity: 10_000,
            collection: "documents".to_string(),
            completeness: CompletenessSpec::general(),
            max_depth: 0,
            field_selectors: Vec::new(),
        }
    }
}

fn validate_seed(seed: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSeed {
        seed: seed.to_string(),
        reason,
    };
    let url = Url::parse(seed).map_err(|err| invalid(err.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(()),
        "http" | "https" => Err(invalid("missing host".to_string())),
        other => Err(invalid(format!("unsupported scheme `{other}`"))),
    }
}

/// Command-line interface for the harvester binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fastharvest",
    about = "Harvest structured documents: static HTML first, headless browser only when needed"
)]
pub struct Cli {
    /// Seed URLs
    #[arg(value_name = "URL")]
    pub seeds: Vec<String>,

    /// File with one seed URL per line (`#` starts a comment)
    #[arg(long, env = "FASTHARVEST_SEED_FILE")]
    pub seed_file: Option<PathBuf>,

    /// Requests admitted across both tiers
    #[arg(long, env = "FASTHARVEST_MAX_REQUESTS", default_value_t = 1_000)]
    pub max_requests: usize,

    /// Concurrent static fetches
    #[arg(long, env = "FASTHARVEST_FAST_CONCURRENCY", default_value_t = 8)]
    pub fast_concurrency: usize,

    /// Concurrent browser tabs
    #[arg(long, env = "FASTHARVEST_RENDER_CONCURRENCY", default_value_t = 2)]
    pub render_concurrency: usize,

    /// Seconds before a static fetch or navigation gives up
    #[arg(long, env = "FASTHARVEST_FETCH_TIMEOUT", default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    /// Milliseconds to wait for a rendered page to finish loading
    #[arg(long, env = "FASTHARVEST_LOAD_SETTLE_MS", default_value_t = 10_000)]
    pub load_settle_ms: u64,

    /// Milliseconds spent probing for consent buttons
    #[arg(long, env = "FASTHARVEST_CONSENT_MS", default_value_t = 1_500)]
    pub consent_ms: u64,

    /// Minimum delay before each render navigation, in milliseconds
    #[arg(long, env = "FASTHARVEST_POLITENESS_MIN_MS", default_value_t = 200)]
    pub politeness_min_ms: u64,

    /// Maximum delay before each render navigation, in milliseconds
    #[arg(long, env = "FASTHARVEST_POLITENESS_MAX_MS", default_value_t = 600)]
    pub politeness_max_ms: u64,

    /// Deferred URLs kept for the render tier
    #[arg(long, env = "FASTHARVEST_FALLBACK_CAPACITY", default_value_t = 10_000)]
    pub fallback_capacity: usize,

    /// Collection documents are written to
    #[arg(long, env = "FASTHARVEST_COLLECTION", default_value = "documents")]
    pub collection: String,

    /// Directory receiving `<collection>.jsonl`
    #[arg(long, env = "FASTHARVEST_OUT_DIR", default_value = "harvest-out")]
    pub out_dir: PathBuf,

    /// Completeness preset: `general` or `probe`
    #[arg(long, env = "FASTHARVEST_COMPLETENESS", default_value = "general")]
    pub completeness: CompletenessSpec,

    /// Required fields overriding the preset, comma separated
    #[arg(long, env = "FASTHARVEST_REQUIRE", value_delimiter = ',')]
    pub require: Vec<String>,

    /// Custom field as `name=css`, repeatable
    #[arg(long = "field", value_name = "NAME=CSS")]
    pub fields: Vec<FieldSelector>,

    /// Internal link depth followed by the fast tier
    #[arg(long, env = "FASTHARVEST_MAX_DEPTH", default_value_t = 0)]
    pub max_depth: u8,

    /// Chromium binary used by the render tier
    #[arg(long, env = "FASTHARVEST_CHROME")]
    pub chrome_path: Option<PathBuf>,

    /// Launch Chromium with `--no-sandbox`
    #[arg(long, env = "FASTHARVEST_NO_SANDBOX", default_value_t = false)]
    pub no_sandbox: bool,

    /// Print the final report as JSON
    #[arg(long, default_value_t = false)]
    pub report_json: bool,
}

impl Cli {
    /// Converts the parsed CLI into `HarvestControls`, reading the seed file if given.
    pub fn build_controls(&self) -> Result<HarvestControls, ConfigError> {
        let mut seeds = self.seeds.clone();
        if let Some(path) = &self.seed_file {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::SeedFile {
                path: path.clone(),
                source,
            })?;
            seeds.extend(parse_seed_lines(&raw));
        }

        let completeness = if self.require.is_empty() {
            self.completeness.clone()
        } else {
            CompletenessSpec::new("custom", self.require.iter().cloned())?
        };

        Ok(HarvestControls::new(seeds)
            .with_max_requests(self.max_requests)
            .with_concurrency(self.fast_concurrency, self.render_concurrency)
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
            .with_load_settle_timeout(Duration::from_millis(self.load_settle_ms))
            .with_consent_timeout(Duration::from_millis(self.consent_ms))
            .with_politeness_ms(self.politeness_min_ms..=self.politeness_max_ms)
            .with_fallback_capacity(self.fallback_capacity)
            .with_collection(self.collection.clone())
            .with_completeness(completeness)
            .with_max_depth(self.max_depth)
            .with_field_selectors(self.fields.clone()))
    }

    /// Browser settings for the render tier.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            chrome_path: self.chrome_path.clone(),
            no_sandbox: self.no_sandbox,
            navigation_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

fn parse_seed_lines(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}
