//! In-memory document store keyed by collection path.
//!
//! The [`DocumentStore`] holds one ordered map of documents per collection.
//! Writes are checked against a per-document size limit and a per-collection
//! document cap. The store itself is not synchronized; the relay wraps it in
//! a lock so that a change and the snapshot broadcast that follows it are
//! observed in the same order by every subscriber.

use std::collections::{BTreeMap, HashMap};

use tasksync_proto::document::{Document, split_path};

/// Default maximum encoded size of a single document in bytes (16 KB).
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024;

/// Default maximum number of documents per collection.
pub const DEFAULT_MAX_DOCUMENTS_PER_COLLECTION: usize = 10_000;

/// Errors returned for rejected store operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The path does not name a document inside a collection.
    #[error("invalid document path: {0}")]
    InvalidPath(String),

    /// The encoded document exceeds the size limit.
    #[error("document too large: {size} bytes (max {max})")]
    TooLarge {
        /// Encoded size of the rejected document.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Adding the document would exceed the collection cap.
    #[error("collection {collection} is full ({max} documents)")]
    CollectionFull {
        /// Collection path.
        collection: String,
        /// Configured limit.
        max: usize,
    },

    /// The document could not be encoded to measure its size.
    #[error("document encode error: {0}")]
    Encode(String),
}

/// Per-collection document maps with size limits.
#[derive(Debug)]
pub struct DocumentStore {
    collections: HashMap<String, BTreeMap<String, Document>>,
    max_document_size: usize,
    max_documents_per_collection: usize,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    /// Creates an empty store with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_DOCUMENT_SIZE,
            DEFAULT_MAX_DOCUMENTS_PER_COLLECTION,
        )
    }

    /// Creates an empty store with custom limits.
    #[must_use]
    pub fn with_limits(max_document_size: usize, max_documents_per_collection: usize) -> Self {
        Self {
            collections: HashMap::new(),
            max_document_size,
            max_documents_per_collection,
        }
    }

    /// Creates or replaces the document at `path`, returning its collection
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the path is malformed, the document is too
    /// large, or the collection is full and `path` is a new document.
    pub fn set(&mut self, path: &str, document: Document) -> Result<String, StoreError> {
        let (collection, id) =
            split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;

        let size = postcard::to_allocvec(&document)
            .map_err(|e| StoreError::Encode(e.to_string()))?
            .len();
        if size > self.max_document_size {
            return Err(StoreError::TooLarge {
                size,
                max: self.max_document_size,
            });
        }

        let docs = self.collections.entry(collection.to_string()).or_default();
        if !docs.contains_key(id) && docs.len() >= self.max_documents_per_collection {
            return Err(StoreError::CollectionFull {
                collection: collection.to_string(),
                max: self.max_documents_per_collection,
            });
        }
        docs.insert(id.to_string(), document);
        Ok(collection.to_string())
    }

    /// Returns the document at `path`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is malformed.
    pub fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let (collection, id) =
            split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    /// Deletes the document at `path`, returning its collection path and
    /// whether anything was removed. Deleting a missing document is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if the path is malformed.
    pub fn delete(&mut self, path: &str) -> Result<(String, bool), StoreError> {
        let (collection, id) =
            split_path(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let removed = match self.collections.get_mut(collection) {
            Some(docs) => {
                let removed = docs.remove(id).is_some();
                if docs.is_empty() {
                    self.collections.remove(collection);
                }
                removed
            }
            None => false,
        };
        Ok((collection.to_string(), removed))
    }

    /// All documents in `collection`, ordered by document id.
    #[must_use]
    pub fn list(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }
}
