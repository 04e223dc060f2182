//! # JSON Graph Document
//!
//! Interchange format for submissions and normalized output.
//!
//! ```json
//! {
//!   "format": "clinigraph/1",
//!   "triples": [
//!     { "subject": { "blank": "m1" },
//!       "predicate": "http://www.w3.org/1999/02/22-rdf-syntax-ns#type",
//!       "object": { "iri": "http://smartplatforms.org/med#medication" } }
//!   ]
//! }
//! ```
//!
//! Size and triple-count limits are validated before the graph is built.

use crate::graph::Graph;
use crate::primitives::{DOCUMENT_FORMAT, MAX_DOCUMENT_SIZE, MAX_SUBMISSION_TRIPLES};
use crate::{ClinigraphError, Triple};
use serde::{Deserialize, Serialize};

/// A graph document as read from or written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub format: String,
    pub triples: Vec<Triple>,
}

impl GraphDocument {
    /// Wrap a graph in a document with the current format tag.
    #[must_use]
    pub fn new(graph: &Graph) -> Self {
        Self {
            format: DOCUMENT_FORMAT.to_string(),
            triples: graph.triples().collect(),
        }
    }

    /// Check the format tag and the triple limit.
    pub fn validate(&self) -> Result<(), ClinigraphError> {
        if self.format != DOCUMENT_FORMAT {
            return Err(ClinigraphError::SerializationError(format!(
                "Unsupported format: '{}' (expected '{}')",
                self.format, DOCUMENT_FORMAT
            )));
        }
        if self.triples.len() > MAX_SUBMISSION_TRIPLES {
            return Err(ClinigraphError::SerializationError(format!(
                "Submission has {} triples, maximum is {}",
                self.triples.len(),
                MAX_SUBMISSION_TRIPLES
            )));
        }
        Ok(())
    }
}

/// Serialize a graph to a pretty-printed JSON document.
pub fn graph_to_json(graph: &Graph) -> Result<String, ClinigraphError> {
    serde_json::to_string_pretty(&GraphDocument::new(graph))
        .map_err(|e| ClinigraphError::SerializationError(e.to_string()))
}

/// Parse a JSON document into a graph. Duplicate triples collapse.
pub fn graph_from_json(source: &str) -> Result<Graph, ClinigraphError> {
    if source.len() > MAX_DOCUMENT_SIZE {
        return Err(ClinigraphError::SerializationError(format!(
            "Document size {} bytes exceeds maximum allowed {} bytes",
            source.len(),
            MAX_DOCUMENT_SIZE
        )));
    }

    let document: GraphDocument = serde_json::from_str(source).map_err(|e| {
        ClinigraphError::SerializationError(format!("Failed to parse graph document: {}", e))
    })?;
    document.validate()?;

    Ok(document.triples.into_iter().collect())
}

// =============================================================================
// TESTS
// =============================================================================
