//! Ingestion of library files into the index and the durable store
//!
//! One file: extract text, chunk it, embed every chunk, swap the source's
//! records in the index under one lock, then append the new records to the
//! store. A file that yields no text removes its source from the index.

use crate::chunking::{chunk_by_chars, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::embedding::{BatchProcessor, EmbeddingProvider};
use crate::error::{LibragError, Result};
use crate::index::VectorIndex;
use crate::library::{normalize_relative, ExtensionFilter, LibraryFiles, TextExtractor};
use crate::storage::IndexFileStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Chunking and logging knobs for one ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub log_every: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
            log_every: 50,
        }
    }
}

/// Outcome of ingesting one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub source: String,
    pub chunks: usize,
    /// Records of the previous version of this source that were dropped
    pub removed: usize,
    pub persisted: bool,
    pub total_seconds: f64,
    pub embed_seconds: f64,
    pub upsert_seconds: f64,
}

/// Per-file line of a batch ingestion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of ingesting every matching file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIngestReport {
    pub extensions_used: String,
    pub files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub embed_plus_upsert_seconds: f64,
    pub results: Vec<FileOutcome>,
}

pub struct IngestionService {
    library: Arc<LibraryFiles>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    store: Arc<IndexFileStore>,
    extensions: ExtensionFilter,
    auto_save: bool,
}

impl IngestionService {
    pub fn new(
        library: Arc<LibraryFiles>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        store: Arc<IndexFileStore>,
        extensions: ExtensionFilter,
        auto_save: bool,
    ) -> Self {
        Self {
            library,
            extractor,
            embedder,
            index,
            store,
            extensions,
            auto_save,
        }
    }

    /// Default extension filter used when a caller does not override it
    pub fn extensions(&self) -> &ExtensionFilter {
        &self.extensions
    }

    pub fn library(&self) -> &LibraryFiles {
        &self.library
    }

    /// Ingest one file given by its path relative to the library root
    pub async fn ingest_file(&self, relative_path: &str, options: IngestOptions) -> Result<IngestReport> {
        let start = Instant::now();
        let source = normalize_relative(relative_path)?;
        let path = self.library.resolve(&source)?;

        let extractor = Arc::clone(&self.extractor);
        let text = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|e| LibragError::Other(e.into()))??;

        let chunks = chunk_by_chars(&source, &text, options.chunk_size, options.overlap);
        info!(
            "Ingesting '{}' -> {} chunk(s) [chunk_size={}, overlap={}]",
            source,
            chunks.len(),
            options.chunk_size,
            options.overlap
        );

        if chunks.is_empty() {
            // the store keeps older lines until the next compaction drops or supersedes them
            let removed = self.index.remove_source(&source);
            return Ok(IngestReport {
                source,
                chunks: 0,
                removed,
                persisted: false,
                total_seconds: start.elapsed().as_secs_f64(),
                embed_seconds: 0.0,
                upsert_seconds: 0.0,
            });
        }
        let chunk_count = chunks.len();

        let embedded = BatchProcessor::new(self.embedder.as_ref(), options.log_every)
            .process(chunks)
            .await?;

        let upsert_start = Instant::now();
        let records = embedded.records;
        let (removed, _) =
            self.index
                .replace_source(&source, records.clone(), options.log_every.max(1))?;
        let upsert_seconds = upsert_start.elapsed().as_secs_f64();

        let persisted = if self.auto_save {
            self.persist(&source, records).await
        } else {
            info!(
                "Auto-save is disabled (storage.auto_save=false); skipping persistence for '{}'",
                source
            );
            false
        };

        let report = IngestReport {
            source,
            chunks: chunk_count,
            removed,
            persisted,
            total_seconds: start.elapsed().as_secs_f64(),
            embed_seconds: embedded.elapsed.as_secs_f64(),
            upsert_seconds,
        };
        info!(
            "Ingestion complete for '{}': chunks={}, total={:.2}s (embed={:.2}s, upsert={:.2}s)",
            report.source, report.chunks, report.total_seconds, report.embed_seconds, report.upsert_seconds
        );
        Ok(report)
    }

    /// Append to the store; a failure here leaves the index updated and is only logged
    async fn persist(&self, source: &str, records: Vec<crate::index::Record>) -> bool {
        let store = Arc::clone(&self.store);
        let count = records.len();
        let start = Instant::now();
        match tokio::task::spawn_blocking(move || store.append_batch(&records)).await {
            Ok(Ok(())) => {
                info!(
                    "Persisted {} record(s) for '{}' to {} in {:.2}s",
                    count,
                    source,
                    self.store.path().display(),
                    start.elapsed().as_secs_f64()
                );
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to persist records for '{}': {}", source, e);
                false
            }
            Err(e) => {
                warn!("Persistence task for '{}' failed: {}", source, e);
                false
            }
        }
    }

    /// Ingest every file matching `extensions` (or the default filter when
    /// `None` or empty); one file's failure does not stop the others
    pub async fn ingest_all(
        &self,
        extensions: Option<&ExtensionFilter>,
        options: IngestOptions,
    ) -> Result<BatchIngestReport> {
        let filter = match extensions {
            Some(f) if !f.is_empty() => f.clone(),
            _ => self.extensions.clone(),
        };

        let library = Arc::clone(&self.library);
        let list_filter = filter.clone();
        let files = tokio::task::spawn_blocking(move || library.list(&list_filter))
            .await
            .map_err(|e| LibragError::Other(e.into()))??;

        let total = files.len();
        let mut report = BatchIngestReport {
            extensions_used: filter.to_string(),
            files: total,
            succeeded: 0,
            failed: 0,
            chunks: 0,
            embed_plus_upsert_seconds: 0.0,
            results: Vec::with_capacity(total),
        };

        for (i, entry) in files.into_iter().enumerate() {
            let path = entry.relative_path;
            match self.ingest_file(&path, options).await {
                Ok(r) => {
                    info!(
                        "Batch progress {}/{}: '{}', chunks={}, total={:.2}s",
                        i + 1,
                        total,
                        path,
                        r.chunks,
                        r.total_seconds
                    );
                    report.succeeded += 1;
                    report.chunks += r.chunks;
                    report.embed_plus_upsert_seconds += r.embed_seconds + r.upsert_seconds;
                    report.results.push(FileOutcome {
                        path,
                        report: Some(r),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Failed to ingest '{}': {}", path, e);
                    report.failed += 1;
                    report.results.push(FileOutcome {
                        path,
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(report)
    }
}
