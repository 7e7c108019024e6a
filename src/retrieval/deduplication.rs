//! Result deduplication by chunk id

use crate::index::SearchHit;
use ahash::{HashMap, HashMapExt};

/// Deduplicate hits by id, keeping the highest score seen for each id
///
/// # Returns
/// Hits sorted by descending score; equal scores keep first-seen order
pub fn deduplicate_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut best: Vec<SearchHit> = Vec::with_capacity(hits.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        match positions.get(&hit.id) {
            Some(&pos) => {
                if hit.score > best[pos].score {
                    best[pos] = hit;
                }
            }
            None => {
                positions.insert(hit.id.clone(), best.len());
                best.push(hit);
            }
        }
    }

    best.sort_by(|a, b| b.score.total_cmp(&a.score));
    best
}
