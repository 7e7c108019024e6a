//! Embedding generation
//!
//! - `EmbeddingProvider` trait for abstraction over backends
//! - `OllamaEmbedder` talking to a local Ollama server
//! - `BatchProcessor` embedding a source's chunks with progress logging
//! - `check_ollama` startup check for installed models

mod batch;
mod health;
mod ollama;
mod provider;

pub use batch::{BatchProcessor, BatchResult};
pub use health::{check_ollama, is_installed, HealthReport};
pub use ollama::OllamaEmbedder;
pub use provider::{EmbeddingError, EmbeddingProvider};
