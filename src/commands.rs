// CLI command handlers
// The only place that formats user-facing strings. Expected failures render
// through RagError::user_message(); unexpected ones propagate and exit nonzero.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::RagError;
use crate::config::Config;
use crate::database::documents::MemoryDocumentStore;
use crate::database::lancedb::VectorStore;
use crate::embeddings::OllamaEmbedder;
use crate::extract::PlainTextExtractor;
use crate::generation::OllamaGenerator;
use crate::rag::RagEngine;

/// Identity recorded against CLI queries when none is given.
const DEFAULT_IDENTITY: &str = "cli";

/// Wire up a full engine from configuration.
#[inline]
pub async fn build_engine(config: Config) -> Result<RagEngine> {
    let embedder = OllamaEmbedder::new(&config).context("Failed to create embedding client")?;
    let generator = OllamaGenerator::new(&config).context("Failed to create generation client")?;
    let vector_store = VectorStore::new(&config)
        .await
        .context("Failed to open vector store")?;

    Ok(RagEngine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(embedder),
        Arc::new(generator),
        Arc::new(vector_store),
        Arc::new(MemoryDocumentStore::new()),
    ))
}

/// Ingest a file from disk into the index.
#[inline]
pub async fn ingest_file(engine: &RagEngine, path: &Path) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("Path has no usable filename")?;

    info!("Ingesting file: {}", path.display());
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;

    match engine.ingest(filename, &bytes).await {
        Ok(receipt) => {
            println!("Ingested '{}' as document {}", filename, receipt.document_id);
            println!("  Chunks indexed: {}", receipt.chunks_stored);
            Ok(())
        }
        Err(e @ RagError::Validation(_)) => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Ask a question against the index.
#[inline]
pub async fn query(
    engine: &RagEngine,
    question: &str,
    document_id: Option<&str>,
    identity: Option<&str>,
) -> Result<()> {
    let identity = identity.unwrap_or(DEFAULT_IDENTITY);

    match engine.answer(question, identity, document_id).await {
        Ok(response) => {
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    println!("  {} ({})", source.filename, source.document_id);
                }
            }
            Ok(())
        }
        Err(e @ (RagError::Validation(_) | RagError::RateLimited)) => {
            println!("{}", e.user_message());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// List ingested documents.
#[inline]
pub async fn list_documents(engine: &RagEngine) -> Result<()> {
    let documents = engine.list_documents().await?;

    if documents.is_empty() {
        println!("No documents have been ingested yet.");
        println!("Use 'docrag ingest <file>' to add one.");
        return Ok(());
    }

    println!("Documents ({} total):", documents.len());
    for document in &documents {
        println!(
            "  {}  {}  ({} chars, added {})",
            document.id,
            document.filename,
            document.content.len(),
            document.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Delete one document and its vectors.
#[inline]
pub async fn delete_document(engine: &RagEngine, document_id: &str) -> Result<()> {
    if engine.delete_document(document_id).await? {
        println!("Deleted document {}", document_id);
    } else {
        println!("No document found with id {}", document_id);
    }
    Ok(())
}

/// Show index statistics.
#[inline]
pub async fn show_stats(engine: &RagEngine) -> Result<()> {
    let stats = engine.stats().await?;
    println!("Documents: {}", stats.documents);
    println!("Indexed points: {}", stats.points);
    Ok(())
}

/// List raw index points, for debugging.
#[inline]
pub async fn list_points(engine: &RagEngine, limit: usize) -> Result<()> {
    let points = engine.list_points(limit).await?;

    if points.is_empty() {
        println!("The index contains no points.");
        return Ok(());
    }

    println!("Points (showing up to {}):", limit);
    for point in &points {
        println!(
            "  {}  doc={}  chunk={}  ({})",
            point.id, point.document_id, point.chunk_index, point.filename
        );
    }
    Ok(())
}

/// Drop every document and vector point.
#[inline]
pub async fn reset_index(engine: &RagEngine) -> Result<()> {
    engine.reset().await?;
    println!("Index reset: all documents and points removed.");
    Ok(())
}

/// Print the active configuration as TOML.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("Configuration directory: {}", config.base_dir.display());
    println!();
    print!("{rendered}");
    Ok(())
}
