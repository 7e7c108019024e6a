//! Engine: wires the components together from a [`Config`] and exposes the
//! administrative operations (save, load, info, ingest, retrieve)

use crate::chat::{ChatClient, OllamaChatClient, RagChat};
use crate::config::Config;
use crate::embedding::{check_ollama, EmbeddingProvider, HealthReport, OllamaEmbedder};
use crate::error::{LibragError, Result};
use crate::index::{IndexInfo, VectorIndex};
use crate::ingest::{BatchIngestReport, IngestOptions, IngestReport, IngestionService};
use crate::library::{ExtensionFilter, LibraryFiles, PlainTextExtractor, TextExtractor};
use crate::retrieval::{HintExtractor, MultiQueryRetriever, OllamaHintExtractor, RetrievalResult};
use crate::storage::{CompactReport, IndexFileStore, LoadReport};
use crate::watch::{CompactOutcome, WatchScheduler, WatchSettings};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// External capabilities the engine depends on
pub struct Backends {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub hints: Arc<dyn HintExtractor>,
    pub chat: Arc<dyn ChatClient>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl Backends {
    /// Ollama-backed embedder, hint extractor and chat client sharing one HTTP client
    pub fn ollama(config: &Config) -> Self {
        let http = reqwest::Client::new();
        let base_url = &config.ollama.base_url;
        Self {
            embedder: Arc::new(OllamaEmbedder::with_client(
                http.clone(),
                base_url,
                &config.ollama.embedding_model,
            )),
            hints: Arc::new(OllamaHintExtractor::new(
                http.clone(),
                base_url,
                config.hints_model(),
            )),
            chat: Arc::new(OllamaChatClient::new(http, base_url, &config.ollama.chat_model)),
            extractor: Arc::new(PlainTextExtractor),
        }
    }
}

/// Options for [`Engine::load_now`]
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Empty the in-memory index first
    pub clear: bool,
    pub batch_size: usize,
    pub log_every: usize,
}

impl LoadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            clear: config.load.clear,
            batch_size: config.load.batch_size,
            log_every: config.load.log_every,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub store_path: String,
    /// `None` when the file did not exist
    pub size_bytes_before: Option<u64>,
    pub size_bytes_after: Option<u64>,
    pub last_modified_before: Option<DateTime<Utc>>,
    pub last_modified_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactReport>,
    pub index: IndexInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadNowReport {
    /// Records dropped from memory before loading
    pub cleared: usize,
    pub load: LoadReport,
    pub index: IndexInfo,
}

pub struct Engine {
    config: Config,
    index: Arc<VectorIndex>,
    store: Arc<IndexFileStore>,
    library: Arc<LibraryFiles>,
    ingestion: Arc<IngestionService>,
    retriever: Arc<MultiQueryRetriever>,
    chat: RagChat,
    scheduler: Arc<WatchScheduler>,
}

impl Engine {
    /// Build an engine talking to the configured Ollama server
    pub fn from_config(config: Config) -> Result<Self> {
        let backends = Backends::ollama(&config);
        Self::new(config, backends)
    }

    pub fn new(config: Config, backends: Backends) -> Result<Self> {
        let library = Arc::new(LibraryFiles::open(config.library_root())?);
        let store = Arc::new(IndexFileStore::new(config.store_path()));
        let index = Arc::new(VectorIndex::new());
        let extensions = ExtensionFilter::parse(&config.library.extensions);

        let ingestion = Arc::new(IngestionService::new(
            Arc::clone(&library),
            backends.extractor,
            Arc::clone(&backends.embedder),
            Arc::clone(&index),
            Arc::clone(&store),
            extensions.clone(),
            config.storage.auto_save,
        ));
        let retriever = Arc::new(MultiQueryRetriever::new(
            backends.embedder,
            Arc::clone(&index),
            backends.hints,
            config.retrieval.clone(),
        ));
        let chat = RagChat::new(
            Arc::clone(&retriever),
            backends.chat,
            config.retrieval.top_k,
            config.retrieval.max_context_chars,
        );
        let scheduler = Arc::new(WatchScheduler::new(
            Arc::clone(&library),
            Arc::clone(&ingestion),
            Arc::clone(&index),
            Arc::clone(&store),
            extensions,
            ingest_options(&config),
        ));

        info!(
            "Engine ready: library={}, store={}",
            library.root().display(),
            store.path().display()
        );

        Ok(Self {
            config,
            index,
            store,
            library,
            ingestion,
            retriever,
            chat,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<IndexFileStore> {
        &self.store
    }

    pub fn library(&self) -> &LibraryFiles {
        &self.library
    }

    pub fn chat(&self) -> &RagChat {
        &self.chat
    }

    pub fn scheduler(&self) -> &Arc<WatchScheduler> {
        &self.scheduler
    }

    /// Startup load according to `[load]`; failures are logged and the index stays as is
    pub async fn auto_load(&self) -> Option<LoadNowReport> {
        if !self.config.load.auto_load {
            info!("Index auto-load disabled (load.auto_load=false). Skipping.");
            return None;
        }
        match self.load_now(LoadOptions::from_config(&self.config)).await {
            Ok(r) => {
                info!(
                    "Auto-load complete from {}: loaded {} records in {:.2}s (in-memory chunks={}, dim={:?})",
                    r.load.path, r.load.records, r.load.seconds, r.index.count, r.index.dimension
                );
                Some(r)
            }
            Err(e) => {
                warn!("Index auto-load failed: {}", e);
                None
            }
        }
    }

    /// Rebuild the in-memory index from the store
    pub async fn load_now(&self, options: LoadOptions) -> Result<LoadNowReport> {
        let cleared = if options.clear {
            let n = self.index.clear();
            info!("Cleared in-memory index before load ({} records removed).", n);
            n
        } else {
            0
        };

        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let batch_size = options.batch_size.max(1);
        let log_every = options.log_every.max(1);
        let load = tokio::task::spawn_blocking(move || store.load_into_index(&index, batch_size, log_every))
            .await
            .map_err(|e| LibragError::Other(e.into()))??;

        Ok(LoadNowReport {
            cleared,
            load,
            index: self.index.info(),
        })
    }

    /// Compact the store now, reporting its size before and after
    pub async fn save_now(&self) -> Result<SaveReport> {
        let path = self.store.path();
        let (size_bytes_before, last_modified_before) = file_stamp(path);

        let compaction = match self.scheduler.compact_once().await? {
            CompactOutcome::Completed(r) => Some(r),
            CompactOutcome::Skipped => {
                info!("Compaction already in progress; reporting current state");
                None
            }
            CompactOutcome::NoStore => None,
        };

        let (size_bytes_after, last_modified_after) = file_stamp(path);
        Ok(SaveReport {
            store_path: path.display().to_string(),
            size_bytes_before,
            size_bytes_after,
            last_modified_before,
            last_modified_after,
            compaction,
            index: self.index.info(),
        })
    }

    pub fn index_info(&self) -> IndexInfo {
        self.index.info()
    }

    pub async fn ingest_one(&self, relative_path: &str) -> Result<IngestReport> {
        self.ingestion
            .ingest_file(relative_path, ingest_options(&self.config))
            .await
    }

    /// Ingest every library file; `extensions` overrides the configured filter
    pub async fn ingest_all(&self, extensions: Option<&str>) -> Result<BatchIngestReport> {
        let filter = extensions.map(ExtensionFilter::parse);
        self.ingestion
            .ingest_all(filter.as_ref(), ingest_options(&self.config))
            .await
    }

    /// Retrieve with the configured defaults for anything not given
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<RetrievalResult> {
        let top_k = top_k.filter(|&k| k > 0).unwrap_or(self.config.retrieval.top_k);
        self.retriever
            .retrieve(query, top_k, self.config.retrieval.max_context_chars)
            .await
    }

    /// Ask the Ollama server for the configured models
    pub async fn health(&self) -> Result<HealthReport> {
        check_ollama(
            &reqwest::Client::new(),
            &self.config.ollama.base_url,
            &self.config.ollama.embedding_model,
            &self.config.ollama.chat_model,
        )
        .await
        .map_err(|e| LibragError::Other(e.into()))
    }

    /// Start the watch and compaction loops
    pub fn start_background(&self, shutdown: CancellationToken) -> Result<Vec<JoinHandle<()>>> {
        let settings = WatchSettings::from_config(&self.config)?;
        Ok(self.scheduler.spawn(settings, shutdown))
    }
}

fn ingest_options(config: &Config) -> IngestOptions {
    IngestOptions {
        chunk_size: config.ingest.chunk_size,
        overlap: config.ingest.overlap,
        log_every: config.ingest.log_every,
    }
}

fn file_stamp(path: &Path) -> (Option<u64>, Option<DateTime<Utc>>) {
    match std::fs::metadata(path) {
        Ok(meta) => (
            Some(meta.len()),
            meta.modified().ok().map(DateTime::<Utc>::from),
        ),
        Err(_) => (None, None),
    }
}
