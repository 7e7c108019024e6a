//! Multi-query retrieval: full question plus entity hints, unioned,
//! deduplicated and optionally diversified with MMR

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::{SearchHit, VectorIndex};
use crate::retrieval::{build_context, deduplicate_hits, mmr_select, HintExtractor, NO_MATCHES};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Minimum number of candidates pulled by the base query
const BASE_MIN_CANDIDATES: usize = 6;

/// Ranked hits plus the assembled context block
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub hits: Vec<SearchHit>,
    pub context: String,
    pub hints_used: Vec<String>,
}

impl RetrievalResult {
    fn empty() -> Self {
        Self {
            hits: Vec::new(),
            context: NO_MATCHES.to_string(),
            hints_used: Vec::new(),
        }
    }
}

pub struct MultiQueryRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<VectorIndex>,
    hints: Arc<dyn HintExtractor>,
    config: RetrievalConfig,
}

impl MultiQueryRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        hints: Arc<dyn HintExtractor>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            hints,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `top_k` chunks for `query` and a context of at most
    /// `max_context_chars` characters
    ///
    /// Fails only when the query itself cannot be embedded or searched; hint
    /// failures just narrow the candidate set.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        max_context_chars: usize,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Ok(RetrievalResult::empty());
        }
        let start = Instant::now();
        let top_k = top_k.max(1);

        let query_vec = self.embedder.embed(query).await?;
        let mut merged = self
            .index
            .search(&query_vec, top_k.max(BASE_MIN_CANDIDATES))?;

        let hint_cap = self.config.max_hints.min(top_k.max(3));
        let hints = if hint_cap == 0 {
            Vec::new()
        } else {
            self.hints.extract_hints(query, hint_cap).await
        };
        let per_hint = (top_k / hints.len().max(1)).max(2);

        for hint in &hints {
            match self.embedder.embed(hint).await {
                Ok(v) => match self.index.search(&v, per_hint) {
                    Ok(found) => merged.extend(found),
                    Err(e) => warn!("Search for hint '{}' failed: {}", hint, e),
                },
                Err(e) => warn!("Embedding hint '{}' failed: {}", hint, e),
            }
        }

        let candidates = deduplicate_hits(merged);
        let hits = if self.config.mmr_enabled && candidates.len() > top_k {
            self.rerank(candidates, &query_vec, top_k).await
        } else {
            let mut c = candidates;
            c.truncate(top_k);
            c
        };

        let context = build_context(&hits, max_context_chars);
        debug!(
            "Retrieved {} hit(s) with {} hint(s) in {:.3}s",
            hits.len(),
            hints.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(RetrievalResult {
            hits,
            context,
            hints_used: hints,
        })
    }

    /// MMR over the top of the candidate list; candidate texts are re-embedded
    async fn rerank(&self, candidates: Vec<SearchHit>, query_vec: &[f32], top_k: usize) -> Vec<SearchHit> {
        let pool = self
            .config
            .mmr_overfetch
            .max(top_k * 3)
            .min(candidates.len());
        let mut pool_hits = candidates;
        pool_hits.truncate(pool);

        let mut vectors = Vec::with_capacity(pool_hits.len());
        for hit in &pool_hits {
            match self.embedder.embed(&hit.text).await {
                Ok(v) => vectors.push(v),
                Err(e) => {
                    debug!("Embedding candidate {} failed: {}", hit.id, e);
                    vectors.push(vec![0.0; query_vec.len()]);
                }
            }
        }

        let order = mmr_select(&vectors, query_vec, top_k, self.config.mmr_lambda);
        let mut slots: Vec<Option<SearchHit>> = pool_hits.into_iter().map(Some).collect();
        order.into_iter().filter_map(|i| slots[i].take()).collect()
    }
}
