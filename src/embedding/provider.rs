/// Embedding provider trait and errors
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model is not configured (ollama.embedding_model)")]
    NotConfigured,

    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected embedding response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Trait for embedding providers
///
/// Turns a piece of text into a fixed-length vector. The length is a property
/// of the model and is not known up front; the vector index adopts whatever
/// length the first stored vector has.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
