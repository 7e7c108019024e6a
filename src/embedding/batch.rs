/// Batch embedding of chunks with progress logging
use super::{EmbeddingError, EmbeddingProvider};
use crate::chunking::Chunk;
use crate::index::Record;
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a batch embedding run
#[derive(Debug)]
pub struct BatchResult {
    pub records: Vec<Record>,
    pub elapsed: Duration,
}

/// Embeds chunks one at a time, in order
///
/// A single failed embedding aborts the batch: a source is only ever indexed
/// with the complete set of its chunks.
pub struct BatchProcessor<'a> {
    provider: &'a dyn EmbeddingProvider,
    log_every: usize,
}

impl<'a> BatchProcessor<'a> {
    /// `log_every == 0` falls back to one progress line every 50 chunks
    pub fn new(provider: &'a dyn EmbeddingProvider, log_every: usize) -> Self {
        Self {
            provider,
            log_every: if log_every == 0 { 50 } else { log_every },
        }
    }

    pub async fn process(&self, chunks: Vec<Chunk>) -> Result<BatchResult, EmbeddingError> {
        let start = Instant::now();
        let total = chunks.len();
        let mut records = Vec::with_capacity(total);

        for (i, chunk) in chunks.into_iter().enumerate() {
            let vector = self.provider.embed(&chunk.text).await?;
            records.push(Record::from_chunk(chunk, vector));

            let done = i + 1;
            if done % self.log_every == 0 || done == total {
                let elapsed = start.elapsed().as_secs_f64();
                info!(
                    "Embedding progress {}/{} ({:.1}%), elapsed {:.2}s, rate {:.1} items/s",
                    done,
                    total,
                    100.0 * done as f64 / total as f64,
                    elapsed,
                    done as f64 / elapsed.max(1e-6)
                );
            }
        }

        Ok(BatchResult {
            records,
            elapsed: start.elapsed(),
        })
    }
}
