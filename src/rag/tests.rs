use super::*;
use crate::config::EmbeddingConfig;
use crate::extract::PlainTextExtractor;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const DIMENSION: usize = 5;

/// Deterministic embedder: every text maps to the same unit-ish vector, so
/// anything indexed is retrievable by any query. Counts calls.
struct StubEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::ProviderUnavailable(
                "stub embedder is down".to_string(),
            ));
        }
        Ok(texts
            .iter()
            .map(|_| vec![0.1, 0.2, 0.3, 0.4, 0.5])
            .collect())
    }

    async fn dimension(&self) -> Result<usize> {
        Ok(DIMENSION)
    }
}

/// Canned-response generator that records the prompts it sees.
struct StubGenerator {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    response: String,
    fail: bool,
}

impl StubGenerator {
    fn new(response: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            response: response.to_string(),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .expect("prompt mutex poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl GenerationProvider for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::ProviderUnavailable(
                "stub generator is down".to_string(),
            ));
        }
        self.prompts
            .lock()
            .expect("prompt mutex poisoned")
            .push(prompt.to_string());
        Ok(self.response.clone())
    }
}

struct TestEngine {
    engine: RagEngine,
    embedder: Arc<StubEmbedder>,
    generator: Arc<StubGenerator>,
    _temp_dir: TempDir,
}

async fn create_engine(embedder: StubEmbedder, generator: StubGenerator) -> TestEngine {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        embedding: EmbeddingConfig {
            dimension: DIMENSION as u32,
            ..EmbeddingConfig::default()
        },
        ..Config::default()
    };

    let vector_store = Arc::new(
        VectorStore::new(&config)
            .await
            .expect("should create vector store"),
    );
    let embedder = Arc::new(embedder);
    let generator = Arc::new(generator);

    let engine = RagEngine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
        Arc::clone(&generator) as Arc<dyn GenerationProvider>,
        vector_store,
        Arc::new(crate::database::documents::MemoryDocumentStore::new()),
    );

    TestEngine {
        engine,
        embedder,
        generator,
        _temp_dir: temp_dir,
    }
}

const PARIS_TEXT: &[u8] =
    b"Paris is the capital of France. It is known for the Eiffel Tower and the Louvre museum.";

#[tokio::test]
async fn ingest_then_answer() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("Paris.")).await;

    let receipt = test
        .engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");
    assert!(receipt.chunks_stored >= 1);
    assert!(!receipt.document_id.is_empty());

    let response = test
        .engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");

    assert_eq!(response.answer, "Paris.");
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, receipt.document_id);
    assert_eq!(response.sources[0].filename, "france.txt");
    assert_eq!(test.generator.call_count(), 1);
}

#[tokio::test]
async fn empty_index_returns_canned_answer_without_generation() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;

    let response = test
        .engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");

    assert_eq!(response.answer, NO_RELEVANT_INFORMATION);
    assert!(response.sources.is_empty());
    assert_eq!(test.embedder.call_count(), 1);
    assert_eq!(test.generator.call_count(), 0);
}

#[tokio::test]
async fn cached_answer_short_circuits_providers() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("Paris.")).await;
    test.engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");
    let embed_calls_after_ingest = test.embedder.call_count();

    let first = test
        .engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");
    let second = test
        .engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");

    assert_eq!(first, second);
    assert_eq!(test.embedder.call_count(), embed_calls_after_ingest + 1);
    assert_eq!(test.generator.call_count(), 1);
}

#[tokio::test]
async fn scoped_and_unscoped_queries_cache_separately() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("Paris.")).await;
    let receipt = test
        .engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");

    test.engine
        .answer("capital?", "tester", None)
        .await
        .expect("should answer");
    test.engine
        .answer("capital?", "tester", Some(&receipt.document_id))
        .await
        .expect("should answer");

    // Different cache keys, so the generator ran for both
    assert_eq!(test.generator.call_count(), 2);
}

#[tokio::test]
async fn degraded_answer_when_embedder_down_and_never_cached() {
    let test = create_engine(StubEmbedder::failing(), StubGenerator::new("unused")).await;

    for _ in 0..2 {
        let response = test
            .engine
            .answer("What is the capital of France?", "tester", None)
            .await
            .expect("should answer");
        assert_eq!(response.answer, PROVIDER_DEGRADED);
        assert!(response.sources.is_empty());
    }

    // No caching of degraded answers: the embedder was consulted both times
    assert_eq!(test.embedder.call_count(), 2);
}

#[tokio::test]
async fn degraded_answer_when_generator_down() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::failing()).await;
    test.engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");

    let response = test
        .engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");

    assert_eq!(response.answer, PROVIDER_DEGRADED);
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn rate_limit_rejects_over_quota() {
    let mut test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;
    test.engine.config.limits.rate_limit_requests = 3;

    for _ in 0..3 {
        test.engine
            .answer("anything?", "busy-user", None)
            .await
            .expect("should answer within quota");
    }

    let result = test.engine.answer("anything?", "busy-user", None).await;
    assert!(matches!(result, Err(RagError::RateLimited)));

    // Other identities are unaffected
    test.engine
        .answer("anything?", "other-user", None)
        .await
        .expect("should answer for fresh identity");

    // A manual reset forgives the window
    test.engine.reset_rate_limit("busy-user");
    test.engine
        .answer("anything?", "busy-user", None)
        .await
        .expect("should answer after reset");
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;

    let result = test.engine.answer("   ", "tester", None).await;
    assert!(matches!(result, Err(RagError::Validation(_))));
    assert_eq!(test.embedder.call_count(), 0);
}

#[tokio::test]
async fn ingest_rejects_short_text() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;

    let result = test.engine.ingest("tiny.txt", b"hi").await;
    assert!(matches!(result, Err(RagError::Validation(_))));

    let documents = test.engine.list_documents().await.expect("should list");
    assert!(documents.is_empty(), "Rejected upload must leave no record");
}

#[tokio::test]
async fn ingest_rejects_unsupported_extension() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;

    let result = test.engine.ingest("report.pdf", PARIS_TEXT).await;
    assert!(matches!(result, Err(RagError::Validation(_))));
}

#[tokio::test]
async fn failed_indexing_rolls_back_metadata() {
    let test = create_engine(StubEmbedder::failing(), StubGenerator::new("unused")).await;

    let result = test.engine.ingest("france.txt", PARIS_TEXT).await;
    assert!(result.is_err());

    let documents = test.engine.list_documents().await.expect("should list");
    assert!(documents.is_empty(), "Failed ingest must leave no record");
}

#[tokio::test]
async fn prompt_carries_context_and_question() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("Paris.")).await;
    test.engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");

    test.engine
        .answer("What is the capital of France?", "tester", None)
        .await
        .expect("should answer");

    let prompt = test.generator.last_prompt().expect("should have a prompt");
    assert!(prompt.contains("Paris is the capital of France."));
    assert!(prompt.contains("What is the capital of France?"));
    assert!(prompt.contains("only"));
}

#[tokio::test]
async fn scoped_query_only_sees_its_document() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("answer")).await;
    let first = test
        .engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");
    let _second = test
        .engine
        .ingest(
            "germany.txt",
            b"Berlin is the capital of Germany. It has a famous television tower.",
        )
        .await
        .expect("should ingest");

    let response = test
        .engine
        .answer("capital?", "tester", Some(&first.document_id))
        .await
        .expect("should answer");

    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, first.document_id);
}

#[tokio::test]
async fn delete_document_removes_content() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;
    let receipt = test
        .engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");

    let existed = test
        .engine
        .delete_document(&receipt.document_id)
        .await
        .expect("should delete");
    assert!(existed);

    let stats = test.engine.stats().await.expect("should get stats");
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.points, 0);

    let missing = test
        .engine
        .delete_document(&receipt.document_id)
        .await
        .expect("should report missing");
    assert!(!missing);
}

#[tokio::test]
async fn reset_clears_everything_including_cache() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("Paris.")).await;
    test.engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");
    test.engine
        .answer("capital?", "tester", None)
        .await
        .expect("should answer");

    test.engine.reset().await.expect("should reset");

    let stats = test.engine.stats().await.expect("should get stats");
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.points, 0);

    // Cache was cleared: the same question now misses and hits the empty index
    let response = test
        .engine
        .answer("capital?", "tester", None)
        .await
        .expect("should answer");
    assert_eq!(response.answer, NO_RELEVANT_INFORMATION);
}

/// Misbehaving embedder that claims success but returns no vectors.
struct EmptyEmbedder;

#[async_trait]
impl EmbeddingProvider for EmptyEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(Vec::new())
    }

    async fn dimension(&self) -> Result<usize> {
        Ok(DIMENSION)
    }
}

#[tokio::test]
async fn unexpected_pipeline_error_becomes_generic_answer() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        embedding: EmbeddingConfig {
            dimension: DIMENSION as u32,
            ..EmbeddingConfig::default()
        },
        ..Config::default()
    };
    let vector_store = Arc::new(
        VectorStore::new(&config)
            .await
            .expect("should create vector store"),
    );
    let engine = RagEngine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(EmptyEmbedder),
        Arc::new(StubGenerator::new("unused")),
        vector_store,
        Arc::new(crate::database::documents::MemoryDocumentStore::new()),
    );

    let response = engine
        .answer("anything?", "tester", None)
        .await
        .expect("raw errors must not escape");
    assert_eq!(response.answer, GENERIC_FAILURE);
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn stats_reflect_ingested_content() {
    let test = create_engine(StubEmbedder::new(), StubGenerator::new("unused")).await;
    let receipt = test
        .engine
        .ingest("france.txt", PARIS_TEXT)
        .await
        .expect("should ingest");

    let stats = test.engine.stats().await.expect("should get stats");
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.points, receipt.chunks_stored as u64);

    let points = test.engine.list_points(10).await.expect("should list");
    assert_eq!(points.len(), receipt.chunks_stored);
    assert!(points.iter().all(|p| p.document_id == receipt.document_id));
}
