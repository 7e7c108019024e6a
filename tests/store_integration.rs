//! Durable store under concurrent appends and compaction

use librag::index::Record;
use librag::storage::IndexFileStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const BATCHES: usize = 60;
const PER_BATCH: usize = 5;

fn batch(n: usize) -> Vec<Record> {
    (0..PER_BATCH)
        .map(|i| {
            let idx = n * PER_BATCH + i;
            Record::new("stream.txt", idx, format!("record {}", idx), vec![1.0, idx as f32])
        })
        .collect()
}

async fn appends_survive_compaction(file: &str) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(IndexFileStore::new(temp_dir.path().join(file)));
    let live: HashSet<String> = ["stream.txt".to_string()].into_iter().collect();
    let appending = Arc::new(AtomicBool::new(true));

    let appender = {
        let store = Arc::clone(&store);
        let appending = Arc::clone(&appending);
        tokio::task::spawn_blocking(move || {
            for n in 0..BATCHES {
                store.append_batch(&batch(n)).unwrap();
            }
            appending.store(false, Ordering::Release);
        })
    };
    let compactor = {
        let store = Arc::clone(&store);
        let appending = Arc::clone(&appending);
        tokio::task::spawn_blocking(move || {
            let mut passes = 0;
            while appending.load(Ordering::Acquire) {
                if store.compact(&live).unwrap().is_some() {
                    passes += 1;
                }
            }
            passes
        })
    };

    appender.await.unwrap();
    compactor.await.unwrap();

    let read = store.read_all().unwrap();
    assert_eq!(read.skipped, 0);
    let ids: HashSet<String> = read.records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), BATCHES * PER_BATCH);
    for idx in 0..BATCHES * PER_BATCH {
        assert!(ids.contains(&format!("stream.txt::{}", idx)), "lost stream.txt::{}", idx);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_append_and_compact_plain() {
    appends_survive_compaction("index.jsonl").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_append_and_compact_gzip() {
    appends_survive_compaction("index.jsonl.gz").await;
}
