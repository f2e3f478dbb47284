//! Result of a bulk flush.
//!
//! A [`BulkOutcome`] describes a batch the backend actually received. Each
//! [`DocumentError`] names the position of a failed record within the batch
//! submitted since the previous flush; records not named succeeded.

use std::collections::HashSet;

/// A single record the backend refused to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentError {
    /// Zero-based position of the record within the flushed batch.
    pub position: usize,
    /// Status code reported for the document.
    pub status: u16,
    /// Human readable cause.
    pub cause: String,
}

/// Per-record result of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    documents: usize,
    errors: Vec<DocumentError>,
}

impl BulkOutcome {
    pub fn new(documents: usize, errors: Vec<DocumentError>) -> Self {
        Self { documents, errors }
    }

    /// Outcome of a flush where every document was written.
    pub fn success(documents: usize) -> Self {
        Self::new(documents, Vec::new())
    }

    /// Number of documents the backend processed.
    pub fn documents(&self) -> usize {
        self.documents
    }

    pub fn errors(&self) -> &[DocumentError] {
        &self.errors
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Positions of every failed document.
    pub fn failed_positions(&self) -> HashSet<usize> {
        self.errors.iter().map(|e| e.position).collect()
    }
}
