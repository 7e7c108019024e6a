//! In-memory similarity index
//!
//! Exact brute-force cosine search over unit vectors. Every record is keyed by
//! its chunk id; the index never holds two records with the same id.

mod vector_index;

pub use vector_index::{
    cosine_similarity, normalize, IndexError, IndexInfo, SearchHit, UpsertProgress, UpsertSummary,
    VectorIndex,
};

use crate::chunking::{chunk_id, Chunk};
use serde::{Deserialize, Serialize};

/// A chunk plus its embedding vector
///
/// This is also the persisted line shape of the durable store:
/// `{"id", "source", "chunkIndex", "text", "vector"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

impl Record {
    pub fn new(source: impl Into<String>, chunk_index: usize, text: impl Into<String>, vector: Vec<f32>) -> Self {
        let source = source.into();
        Self {
            id: chunk_id(&source, chunk_index),
            source,
            chunk_index,
            text: text.into(),
            vector,
        }
    }

    /// Attach an embedding to a chunk
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id(),
            source: chunk.source,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            vector,
        }
    }
}
