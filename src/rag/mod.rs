// Query and ingestion orchestrator
// Everything user-visible flows through RagEngine. The engine owns no
// formatting beyond its canned answers; error rendering belongs to the CLI.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{RateLimiter, TtlCache};
use crate::chunker::chunk_text;
use crate::config::Config;
use crate::database::documents::{Document, DocumentStore};
use crate::database::lancedb::{
    ChunkPayload, EqualityFilter, PointSummary, SearchHit, VectorPoint, VectorStore,
};
use crate::embeddings::EmbeddingProvider;
use crate::extract::{TextExtractor, validate_upload};
use crate::generation::GenerationProvider;
use crate::{RagError, Result};

/// Returned when retrieval finds nothing. Zero hits is a defined success,
/// never an error.
pub const NO_RELEVANT_INFORMATION: &str =
    "I could not find relevant information about that in the uploaded documents.";

/// Returned when retrieved chunks carried no usable text.
pub const INSUFFICIENT_CONTEXT: &str =
    "The documents I found did not contain enough usable text to answer that question.";

/// Returned when the embedding or generation backend is unreachable.
pub const PROVIDER_DEGRADED: &str =
    "I'm having trouble reaching the language model right now. Please try again in a moment.";

/// Returned when the pipeline fails in a way nothing anticipated. The real
/// error is logged server-side and never shown.
pub const GENERIC_FAILURE: &str =
    "Something went wrong while answering your question. Please try again.";

/// A document that contributed context to an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    /// Contributing documents, deduplicated, in retrieval rank order
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestReceipt {
    pub document_id: String,
    pub chunks_stored: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStats {
    pub documents: usize,
    pub points: u64,
}

/// The RAG pipeline. Holds every collaborator behind a trait object so tests
/// can substitute counting doubles; construction is the only place wiring
/// happens.
pub struct RagEngine {
    config: Config,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    vector_store: Arc<VectorStore>,
    documents: Arc<dyn DocumentStore>,
    answer_cache: TtlCache<QueryResponse>,
    rate_limiter: RateLimiter,
}

impl RagEngine {
    #[inline]
    pub fn new(
        config: Config,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        vector_store: Arc<VectorStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config,
            extractor,
            embedder,
            generator,
            vector_store,
            documents,
            answer_cache: TtlCache::new(),
            rate_limiter: RateLimiter::new(),
        }
    }

    /// Ingest one uploaded file: validate, extract, chunk, embed, index.
    /// The document becomes retrievable only once this returns Ok.
    #[inline]
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestReceipt> {
        let extension = validate_upload(filename, bytes.len() as u64, &self.config.limits)?;
        let text = self.extractor.extract(bytes, &extension)?;

        if text.trim().len() < self.config.limits.min_text_len {
            return Err(RagError::Validation(format!(
                "Document contains too little text (minimum {} characters)",
                self.config.limits.min_text_len
            )));
        }

        let document_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        self.documents
            .insert(Document {
                id: document_id.clone(),
                filename: filename.to_string(),
                content: text.clone(),
                created_at,
            })
            .await?;

        match self
            .index_document(&document_id, filename, &text, &created_at.to_rfc3339())
            .await
        {
            Ok(chunks_stored) => {
                info!(
                    "Ingested '{}' as document {} ({} chunks)",
                    filename, document_id, chunks_stored
                );
                Ok(IngestReceipt {
                    document_id,
                    chunks_stored,
                })
            }
            Err(e) => {
                // Roll back the metadata record so a failed upload leaves
                // nothing behind
                if let Err(cleanup) = self.documents.remove(&document_id).await {
                    warn!(
                        "Failed to remove document {} after indexing error: {}",
                        document_id, cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn index_document(
        &self,
        document_id: &str,
        filename: &str,
        text: &str,
        timestamp: &str,
    ) -> Result<usize> {
        let chunks = chunk_text(
            text,
            self.config.chunking.max_chunk_size,
            self.config.chunking.overlap,
        );
        if chunks.is_empty() {
            return Err(RagError::Validation(
                "Document produced no indexable chunks".to_string(),
            ));
        }

        // One probe per process; a model swap behind the same config must
        // not write into an incompatible vector space
        let provider_dimension = self.embedder.dimension().await?;
        let expected = self.config.embedding.dimension as usize;
        if provider_dimension != expected {
            return Err(RagError::Config(format!(
                "Embedding model produces {provider_dimension}-dim vectors but the index expects {expected}"
            )));
        }

        let vectors = self.embedder.embed(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Internal(anyhow::anyhow!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, vector))| VectorPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: ChunkPayload {
                    document_id: document_id.to_string(),
                    filename: filename.to_string(),
                    text: chunk,
                    chunk_index: index as u32,
                    created_at: timestamp.to_string(),
                },
            })
            .collect();

        let chunks_stored = points.len();
        self.vector_store.upsert(points).await?;
        Ok(chunks_stored)
    }

    /// Answer a question from indexed content, optionally scoped to one
    /// document. Returns Err only for rate limiting and input validation;
    /// every failure past those becomes a safe answer.
    #[inline]
    pub async fn answer(
        &self,
        question: &str,
        identity: &str,
        document_id: Option<&str>,
    ) -> Result<QueryResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Validation("Question cannot be empty".to_string()));
        }

        if self.rate_limiter.is_limited(
            identity,
            self.config.limits.rate_limit_requests,
            Duration::from_secs(self.config.limits.rate_limit_window_secs),
        ) {
            return Err(RagError::RateLimited);
        }

        let cache_key = cache_key(question, document_id);
        if let Some(cached) = self.answer_cache.get(&cache_key) {
            debug!("Answer cache hit");
            return Ok(cached);
        }

        match self.answer_uncached(question, document_id, &cache_key).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // Raw pipeline errors never reach the caller
                error!("Query pipeline failed: {:#}", anyhow::Error::from(e));
                Ok(QueryResponse {
                    answer: GENERIC_FAILURE.to_string(),
                    sources: Vec::new(),
                })
            }
        }
    }

    async fn answer_uncached(
        &self,
        question: &str,
        document_id: Option<&str>,
        cache_key: &str,
    ) -> Result<QueryResponse> {
        let query_vector = match self.embedder.embed(&[question.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => {
                return Err(RagError::Internal(anyhow::anyhow!(
                    "embedding provider returned no vector for the query"
                )));
            }
            Err(RagError::ProviderUnavailable(detail)) => {
                warn!("Embedding provider unavailable: {}", detail);
                return Ok(degraded_response());
            }
            Err(e) => return Err(e),
        };

        let filter = document_id.map(EqualityFilter::document);
        let hits = match self
            .vector_store
            .search(&query_vector, self.config.index.top_k, filter.as_ref())
            .await
        {
            Ok(hits) => hits,
            // "Index down" and "no matches" answer the same; the logs differ
            Err(e) => {
                error!("Vector search failed, treating as empty result: {}", e);
                Vec::new()
            }
        };

        if hits.is_empty() {
            debug!("Retrieval found nothing for this question");
            let response = QueryResponse {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
            };
            if self.config.limits.cache_empty_responses {
                self.cache_response(cache_key, &response);
            }
            return Ok(response);
        }

        let context = assemble_context(&hits);
        if context.is_empty() {
            debug!("Retrieved chunks carried no usable text");
            return Ok(QueryResponse {
                answer: INSUFFICIENT_CONTEXT.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = build_prompt(&context, question);
        let answer = match self.generator.generate(&prompt).await {
            Ok(answer) => answer,
            Err(RagError::ProviderUnavailable(detail)) => {
                warn!("Generation provider unavailable: {}", detail);
                return Ok(degraded_response());
            }
            Err(e) => return Err(e),
        };

        let response = QueryResponse {
            answer,
            sources: rank_ordered_sources(&hits),
        };
        self.cache_response(cache_key, &response);
        Ok(response)
    }

    fn cache_response(&self, key: &str, response: &QueryResponse) {
        self.answer_cache.set(
            key,
            response.clone(),
            Duration::from_secs(self.config.limits.cache_ttl_secs),
        );
    }

    /// Remove a document's metadata and every vector point cut from it.
    /// Returns whether the document existed.
    #[inline]
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        if !self.documents.remove(document_id).await? {
            return Ok(false);
        }
        self.vector_store.delete_document(document_id).await?;
        self.answer_cache.clear();
        info!("Deleted document {}", document_id);
        Ok(true)
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        self.documents.list().await
    }

    #[inline]
    pub async fn stats(&self) -> Result<IndexStats> {
        let documents = self.documents.list().await?.len();
        let points = self.vector_store.count().await?;
        Ok(IndexStats { documents, points })
    }

    #[inline]
    pub async fn list_points(&self, limit: usize) -> Result<Vec<PointSummary>> {
        self.vector_store.list_points(limit).await
    }

    /// Drop every document and vector point. Cached answers go with them.
    #[inline]
    pub async fn reset(&self) -> Result<()> {
        for document in self.documents.list().await? {
            self.documents.remove(&document.id).await?;
        }
        self.vector_store.reset().await?;
        self.answer_cache.clear();
        info!("Index reset");
        Ok(())
    }

    /// Forget an identity's rate-limit window.
    #[inline]
    pub fn reset_rate_limit(&self, identity: &str) {
        self.rate_limiter.reset(identity);
    }
}

fn degraded_response() -> QueryResponse {
    QueryResponse {
        answer: PROVIDER_DEGRADED.to_string(),
        sources: Vec::new(),
    }
}

fn cache_key(question: &str, document_id: Option<&str>) -> String {
    match document_id {
        Some(id) => format!("{question}\u{1}{id}"),
        None => question.to_string(),
    }
}

/// Join retrieved texts in rank order, skipping chunks whose payload text is
/// empty (scanned-image artifacts and the like).
fn assemble_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| hit.payload.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The generation prompt. The model is told to answer only from the supplied
/// context and to say so when the context is not enough; weakening that
/// instruction reopens the door to answers invented outside the documents.
fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant that answers questions using only the provided context.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer using only the information from the context above. If the context does not \
         contain enough information to answer the question, say so explicitly instead of guessing."
    )
}

fn rank_ordered_sources(hits: &[SearchHit]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for hit in hits {
        if sources
            .iter()
            .any(|s| s.document_id == hit.payload.document_id)
        {
            continue;
        }
        sources.push(SourceRef {
            document_id: hit.payload.document_id.clone(),
            filename: hit.payload.filename.clone(),
        });
    }
    sources
}
