//! Record stores receiving harvested documents.

use crate::document::ContentDocument;
use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Failures while persisting a document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Collection names become file names and must stay simple.
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),
    /// Filesystem failure.
    #[error("store io error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only sink for documents, grouped by collection.
#[async_trait(?Send)]
pub trait DocumentStore {
    /// Appends one document to `collection`.
    async fn append(&self, collection: &str, document: &ContentDocument) -> Result<(), StoreError>;
}

/// Accepts letters, digits, `-`, `_` and `.` (not leading).
pub fn validate_collection(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}

/// In-memory store, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RefCell<BTreeMap<String, Vec<ContentDocument>>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the documents appended to `collection`, in append order.
    pub fn documents(&self, collection: &str) -> Vec<ContentDocument> {
        self.collections
            .borrow()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Total documents across collections.
    pub fn len(&self) -> usize {
        self.collections.borrow().values().map(Vec::len).sum()
    }

    /// True when nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait(?Send)]
impl DocumentStore for MemoryStore {
    async fn append(&self, collection: &str, document: &ContentDocument) -> Result<(), StoreError> {
        validate_collection(collection)?;
        self.collections
            .borrow_mut()
            .entry(collection.to_string())
            .or_default()
            .push(document.clone());
        Ok(())
    }
}

/// Writes `<dir>/<collection>.jsonl`, one document per line.
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Creates the output directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a collection's file.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }
}

#[async_trait(?Send)]
impl DocumentStore for JsonlStore {
    async fn append(&self, collection: &str, document: &ContentDocument) -> Result<(), StoreError> {
        validate_collection(collection)?;
        let mut line = serde_json::to_vec(document)?;
        line.push(b'\n');

        let path = self.collection_path(collection);
        let io_error = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        // One whole line per write so concurrent handlers never interleave.
        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;
        file.write_all(&line).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(())
    }
}
