// LanceDB vector index module
// Stores (vector, payload) points and serves filtered similarity search.

pub mod vector_store;

pub use vector_store::VectorStore;

use serde::{Deserialize, Serialize};

/// Payload field carrying the parent document id; the only field the core
/// ever filters on.
pub const DOCUMENT_ID_FIELD: &str = "document_id";

/// Metadata stored alongside each vector. Carries everything needed to
/// rebuild a citation and the text for context assembly; losing any of it
/// on write is a correctness bug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    /// Id of the document this chunk was cut from
    pub document_id: String,
    /// Original filename, for human-readable citations
    pub filename: String,
    /// The chunk text itself
    pub text: String,
    /// Ordinal of this chunk within its document
    pub chunk_index: u32,
    /// RFC 3339 timestamp of when the point was written
    pub created_at: String,
}

/// A single indexed point. Ids are fresh UUIDs per ingestion, independent of
/// the chunk ordinal, so re-uploads can never collide.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// Search result, highest similarity first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Compact point listing for the debugging surface.
#[derive(Debug, Clone, Serialize)]
pub struct PointSummary {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub chunk_index: u32,
}

/// Exact-match filter on a payload field. The single canonical way search
/// scopes are expressed; the value is escaped before reaching the backend
/// predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualityFilter {
    field: String,
    value: String,
}

impl EqualityFilter {
    #[inline]
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Scope a search to a single document.
    #[inline]
    pub fn document(document_id: impl Into<String>) -> Self {
        Self::new(DOCUMENT_ID_FIELD, document_id)
    }

    /// Render as a backend predicate with the value quoted and escaped.
    #[inline]
    pub fn to_predicate(&self) -> String {
        format!("{} = '{}'", self.field, self.value.replace('\'', "''"))
    }
}
