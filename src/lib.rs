use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RagError {
    /// Message safe to surface to a caller. Full detail stays in the server
    /// logs; `Internal` and `Index` never leak their payload.
    #[inline]
    pub fn user_message(&self) -> String {
        match self {
            RagError::Validation(msg) => msg.clone(),
            RagError::RateLimited => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            RagError::ProviderUnavailable(_) => {
                "A backing service is temporarily unavailable. Please try again shortly."
                    .to_string()
            }
            RagError::Config(msg) => format!("Configuration problem: {msg}"),
            RagError::Index(_) | RagError::Io(_) | RagError::Internal(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
        }
    }
}

pub mod cache;
pub mod chunker;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extract;
pub mod generation;
pub mod rag;
