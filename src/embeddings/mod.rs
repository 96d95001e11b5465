// Embedding provider module
// One shared provider instance serves both the ingest and query paths so
// indexed vectors and query vectors always come from the same model.

pub mod ollama;

pub use ollama::OllamaEmbedder;

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed each input text, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality of this provider's model.
    async fn dimension(&self) -> Result<usize>;
}
