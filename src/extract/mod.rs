// Text extraction seam
// Ingestion hands raw bytes plus an extension to an extractor and gets plain
// text back. Rich format parsers (PDF, DOCX, HTML) plug in behind the trait.


use tracing::debug;

use crate::config::LimitsConfig;
use crate::{RagError, Result};

pub trait TextExtractor: Send + Sync {
    /// Extract plain text from raw file bytes.
    fn extract(&self, bytes: &[u8], extension: &str) -> Result<String>;
}

/// Extractor for plain-text formats. Decodes lossily so a stray invalid byte
/// does not reject an otherwise readable document.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    #[inline]
    fn extract(&self, bytes: &[u8], extension: &str) -> Result<String> {
        match extension {
            "txt" | "md" | "csv" => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                debug!(
                    "Extracted {} bytes of text from .{} upload",
                    text.len(),
                    extension
                );
                Ok(text)
            }
            other => Err(RagError::Validation(format!(
                "Unsupported file type: .{other}"
            ))),
        }
    }
}

/// Lower-cased extension of a filename, without the dot.
#[inline]
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Enforce upload preconditions before any extraction work happens.
#[inline]
pub fn validate_upload(filename: &str, size: u64, limits: &LimitsConfig) -> Result<String> {
    if filename.trim().is_empty() {
        return Err(RagError::Validation("No filename provided".to_string()));
    }

    let extension = file_extension(filename).ok_or_else(|| {
        RagError::Validation(format!("File '{filename}' has no recognizable extension"))
    })?;

    if !limits.allowed_extensions.contains(&extension) {
        return Err(RagError::Validation(format!(
            "Unsupported file type: .{extension}. Supported: {}",
            limits.allowed_extensions.join(", ")
        )));
    }

    if size > limits.max_upload_bytes {
        return Err(RagError::Validation(format!(
            "File too large ({size} bytes, max {})",
            limits.max_upload_bytes
        )));
    }

    Ok(extension)
}
