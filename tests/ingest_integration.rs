//! Ingestion: library file -> chunks -> embeddings -> index + store

mod common;

use common::{write, FlakyEmbedder, WordEmbedder};
use librag::embedding::EmbeddingProvider;
use librag::error::{ErrorKind, LibragError};
use librag::index::VectorIndex;
use librag::ingest::{IngestOptions, IngestionService};
use librag::library::{ExtensionFilter, LibraryFiles, PlainTextExtractor};
use librag::storage::IndexFileStore;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    index: Arc<VectorIndex>,
    store: Arc<IndexFileStore>,
    service: IngestionService,
}

fn fixture_with(embedder: Arc<dyn EmbeddingProvider>, auto_save: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("library");
    let library = Arc::new(LibraryFiles::open(&root).unwrap());
    let index = Arc::new(VectorIndex::new());
    let store = Arc::new(IndexFileStore::new(dir.path().join("data").join("index.jsonl")));
    let service = IngestionService::new(
        library,
        Arc::new(PlainTextExtractor),
        embedder,
        Arc::clone(&index),
        Arc::clone(&store),
        ExtensionFilter::parse("txt,md"),
        auto_save,
    );
    Fixture {
        _dir: dir,
        root,
        index,
        store,
        service,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(WordEmbedder), true)
}

fn small_chunks() -> IngestOptions {
    IngestOptions {
        chunk_size: 40,
        overlap: 10,
        log_every: 1,
    }
}

#[tokio::test]
async fn test_ingest_file_indexes_and_persists() {
    let fx = fixture();
    write(
        &fx.root,
        "people/alice.txt",
        "Alice likes sushi and green tea. She lives in Vienna and works as a pilot.",
    );

    let report = fx
        .service
        .ingest_file("people/alice.txt", small_chunks())
        .await
        .unwrap();

    assert_eq!(report.source, "people/alice.txt");
    assert!(report.chunks >= 2);
    assert!(report.persisted);
    assert_eq!(report.removed, 0);
    assert_eq!(fx.index.len(), report.chunks);

    let stored = fx.store.read_all().unwrap();
    assert_eq!(stored.records.len(), report.chunks);
    assert!(stored
        .records
        .iter()
        .all(|r| r.source == "people/alice.txt"));
    assert_eq!(stored.records[0].id, "people/alice.txt::0");
}

#[tokio::test]
async fn test_reingest_replaces_previous_chunks() {
    let fx = fixture();
    write(&fx.root, "notes.md", &"long line of text ".repeat(20));
    let first = fx.service.ingest_file("notes.md", small_chunks()).await.unwrap();

    write(&fx.root, "notes.md", "short now");
    let second = fx.service.ingest_file("notes.md", small_chunks()).await.unwrap();

    assert_eq!(second.chunks, 1);
    assert_eq!(second.removed, first.chunks);
    assert_eq!(fx.index.len(), 1);
    // the store is an append log until compaction
    assert_eq!(fx.store.read_all().unwrap().records.len(), first.chunks + 1);
}

#[tokio::test]
async fn test_empty_file_removes_source() {
    let fx = fixture();
    write(&fx.root, "a.txt", "Some content worth indexing.");
    fx.service.ingest_file("a.txt", small_chunks()).await.unwrap();
    assert_eq!(fx.index.len(), 1);

    write(&fx.root, "a.txt", "   \n\t  ");
    let report = fx.service.ingest_file("a.txt", small_chunks()).await.unwrap();

    assert_eq!(report.chunks, 0);
    assert_eq!(report.removed, 1);
    assert!(fx.index.is_empty());
}

#[tokio::test]
async fn test_auto_save_disabled_skips_store() {
    let fx = fixture_with(Arc::new(WordEmbedder), false);
    write(&fx.root, "a.txt", "Bob enjoys climbing.");

    let report = fx.service.ingest_file("a.txt", small_chunks()).await.unwrap();

    assert!(!report.persisted);
    assert_eq!(fx.index.len(), 1);
    assert!(!fx.store.exists());
}

#[tokio::test]
async fn test_bad_paths_are_rejected() {
    let fx = fixture();

    let err = fx
        .service
        .ingest_file("../outside.txt", small_chunks())
        .await
        .unwrap_err();
    assert!(matches!(err, LibragError::PathEscapesRoot { .. }));
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let err = fx
        .service
        .ingest_file("missing.txt", small_chunks())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_embedding_failure_leaves_index_untouched() {
    let fx = fixture_with(
        Arc::new(FlakyEmbedder {
            needle: "poison".to_string(),
        }),
        true,
    );
    write(&fx.root, "a.txt", "Carol plays chess.");
    fx.service.ingest_file("a.txt", small_chunks()).await.unwrap();

    write(&fx.root, "a.txt", "Carol plays chess. poison pill");
    let err = fx.service.ingest_file("a.txt", small_chunks()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unavailable);
    let hits = fx.index.search(&common::word_vector("Carol chess"), 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "Carol plays chess.");
}

#[tokio::test]
async fn test_ingest_all_isolates_failures() {
    let fx = fixture();
    write(&fx.root, "a.txt", "Dave drinks coffee.");
    write(&fx.root, "sub/b.md", "# Eve\nEve reads novels.");
    write(&fx.root, "skip.json", "{\"ignored\": true}");

    // extension override lets a binary format through, which the extractor rejects
    write(&fx.root, "report.pdf", "%PDF-1.4 not really");
    let filter = ExtensionFilter::parse("txt,md,pdf");
    let report = fx
        .service
        .ingest_all(Some(&filter), small_chunks())
        .await
        .unwrap();

    assert_eq!(report.files, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.extensions_used, "md,pdf,txt");
    let failed: Vec<_> = report.results.iter().filter(|r| r.error.is_some()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].path, "report.pdf");

    let sources = fx.index.sources();
    assert_eq!(sources, vec!["a.txt".to_string(), "sub/b.md".to_string()]);
}

#[tokio::test]
async fn test_ingest_all_defaults_to_configured_filter() {
    let fx = fixture();
    write(&fx.root, "a.txt", "Frank fixes bikes.");
    write(&fx.root, "b.json", "{\"frank\": 1}");

    let report = fx.service.ingest_all(None, small_chunks()).await.unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.extensions_used, "md,txt");
}
