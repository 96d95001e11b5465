// Generation provider module

pub mod ollama;

pub use ollama::OllamaGenerator;

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce a completion for the fully assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
