/// Brute-force cosine index over unit vectors
use super::Record;
use ahash::HashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty vector for id {0}")]
    EmptyVector(String),
}

/// Search hit with cosine score
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    /// Cosine similarity in [-1, 1], higher is more similar
    pub score: f32,
}

/// Snapshot of the index state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub count: usize,
    /// Distinct sources, sorted
    pub sources: Vec<String>,
    /// Vector length of the stored items, absent when the index is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

/// Progress tick emitted during a batch upsert
#[derive(Debug, Clone, Copy)]
pub struct UpsertProgress {
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl UpsertProgress {
    /// Items per second so far
    pub fn rate(&self) -> f64 {
        self.processed as f64 / self.elapsed.as_secs_f64().max(1e-6)
    }

    pub fn percent(&self) -> f64 {
        100.0 * self.processed as f64 / self.total.max(1) as f64
    }
}

/// Outcome of a batch upsert
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertSummary {
    pub processed: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Inner {
    items: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl Inner {
    fn dimension(&self) -> Option<usize> {
        self.items.first().map(|item| item.vector.len())
    }

    /// Check a batch against the stored dimension before anything is applied
    fn validate(&self, records: &[Record], current: Option<usize>) -> Result<(), IndexError> {
        let mut expected = current;
        for record in records {
            if record.vector.is_empty() {
                return Err(IndexError::EmptyVector(record.id.clone()));
            }
            match expected {
                Some(dim) if dim != record.vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected: dim,
                        actual: record.vector.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(record.vector.len()),
            }
        }
        Ok(())
    }

    /// Returns true when an existing id was replaced
    fn put(&mut self, mut record: Record) -> bool {
        record.vector = normalize(&record.vector);
        match self.positions.get(&record.id) {
            Some(&pos) => {
                self.items[pos] = record;
                true
            }
            None => {
                self.positions.insert(record.id.clone(), self.items.len());
                self.items.push(record);
                false
            }
        }
    }

    fn remove_source(&mut self, source: &str) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.source != source);
        let removed = before - self.items.len();
        if removed > 0 {
            self.positions.clear();
            for (pos, item) in self.items.iter().enumerate() {
                self.positions.insert(item.id.clone(), pos);
            }
        }
        removed
    }
}

/// In-memory vector index
///
/// All operations go through one reader/writer lock: mutations are exclusive
/// and a search scans a consistent snapshot. A batch upsert is applied under
/// a single write guard, so searches never see part of a batch.
#[derive(Default)]
pub struct VectorIndex {
    inner: RwLock<Inner>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a single record; the vector is normalized first
    pub fn upsert(&self, record: Record) -> Result<(), IndexError> {
        let mut inner = self.inner.write();
        let current = inner.dimension();
        inner.validate(std::slice::from_ref(&record), current)?;
        inner.put(record);
        Ok(())
    }

    /// Batch upsert with progress logged every `log_every` records
    pub fn upsert_all(&self, records: Vec<Record>, log_every: usize) -> Result<UpsertSummary, IndexError> {
        self.upsert_all_observed(records, log_every, |p| {
            tracing::info!(
                "Progress {}/{} ({:.2}%), elapsed {:.2}s, rate {:.1} items/s",
                p.processed,
                p.total,
                p.percent(),
                p.elapsed.as_secs_f64(),
                p.rate()
            );
        })
    }

    /// Batch upsert reporting progress to `observer` every `log_every` records and at the end
    pub fn upsert_all_observed<F>(
        &self,
        records: Vec<Record>,
        log_every: usize,
        mut observer: F,
    ) -> Result<UpsertSummary, IndexError>
    where
        F: FnMut(&UpsertProgress),
    {
        if records.is_empty() {
            tracing::debug!("upsert_all(): nothing to upsert");
            return Ok(UpsertSummary::default());
        }
        let log_every = if log_every == 0 { 200 } else { log_every };

        let mut inner = self.inner.write();
        let current = inner.dimension();
        inner.validate(&records, current)?;
        Ok(apply_batch(&mut inner, records, log_every, &mut observer))
    }

    /// Atomically drop every record of `source` and insert `records` in its place
    pub fn replace_source(
        &self,
        source: &str,
        records: Vec<Record>,
        log_every: usize,
    ) -> Result<(usize, UpsertSummary), IndexError> {
        let log_every = if log_every == 0 { 200 } else { log_every };
        let mut inner = self.inner.write();

        let remaining_dim = inner
            .items
            .iter()
            .find(|item| item.source != source)
            .map(|item| item.vector.len());
        inner.validate(&records, remaining_dim)?;

        let removed = inner.remove_source(source);
        if removed > 0 {
            tracing::info!("Removed {} item(s) for source '{}'", removed, source);
        }
        let summary = apply_batch(&mut inner, records, log_every, &mut |p: &UpsertProgress| {
            tracing::debug!(
                "Progress {}/{} ({:.2}%), rate {:.1} items/s",
                p.processed,
                p.total,
                p.percent(),
                p.rate()
            );
        });
        Ok((removed, summary))
    }

    /// Remove every record whose source matches; returns how many were removed
    pub fn remove_source(&self, source: &str) -> usize {
        let removed = self.inner.write().remove_source(source);
        tracing::info!("Removed {} item(s) for source '{}'", removed, source);
        removed
    }

    /// Drop everything; returns how many records were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.write();
        let removed = inner.items.len();
        inner.items.clear();
        inner.positions.clear();
        removed
    }

    /// Top-k records by cosine similarity to `query`, best first
    ///
    /// Ties keep insertion order. `top_k` is clamped to at least 1.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let inner = self.inner.read();
        let Some(dim) = inner.dimension() else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let start = Instant::now();
        let q = normalize(query);

        let mut scored: Vec<(usize, f32)> = inner
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (pos, dot(&q, &item.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k.max(1));

        let hits = scored
            .into_iter()
            .map(|(pos, score)| {
                let item = &inner.items[pos];
                SearchHit {
                    id: item.id.clone(),
                    source: item.source.clone(),
                    chunk_index: item.chunk_index,
                    text: item.text.clone(),
                    score,
                }
            })
            .collect();

        tracing::debug!(
            "search(top_k={}) scanned {} items in {:.2} ms",
            top_k,
            inner.items.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(hits)
    }

    pub fn info(&self) -> IndexInfo {
        let inner = self.inner.read();
        let sources: BTreeSet<&str> = inner.items.iter().map(|item| item.source.as_str()).collect();
        IndexInfo {
            count: inner.items.len(),
            sources: sources.into_iter().map(str::to_string).collect(),
            dimension: inner.dimension(),
        }
    }

    /// Distinct sources, sorted
    pub fn sources(&self) -> Vec<String> {
        self.info().sources
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored vector length, if anything is stored
    pub fn dimension(&self) -> Option<usize> {
        self.inner.read().dimension()
    }
}

fn apply_batch<F>(inner: &mut Inner, records: Vec<Record>, log_every: usize, observer: &mut F) -> UpsertSummary
where
    F: FnMut(&UpsertProgress),
{
    let start = Instant::now();
    let total = records.len();
    let mut summary = UpsertSummary::default();

    for record in records {
        if inner.put(record) {
            summary.replaced += 1;
        } else {
            summary.inserted += 1;
        }
        summary.processed += 1;

        if summary.processed % log_every == 0 || summary.processed == total {
            observer(&UpsertProgress {
                processed: summary.processed,
                total,
                elapsed: start.elapsed(),
            });
        }
    }

    summary.elapsed = start.elapsed();
    summary
}

/// Scale `v` to unit L2 length
///
/// The norm is floored so an all-zero vector maps to all zeros instead of
/// dividing by zero.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let sum: f64 = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    let inv = 1.0 / sum.max(1e-12).sqrt();
    v.iter().map(|&x| (f64::from(x) * inv) as f32).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum::<f64>() as f32
}

/// Cosine similarity of two vectors of equal length
///
/// Vectors of different length have no defined similarity and yield `None`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(dot(&normalize(a), &normalize(b)))
}
