//! Maximal Marginal Relevance selection

use crate::index::{cosine_similarity, normalize};

/// Greedily pick up to `k` candidates maximizing
/// `lambda * rel(c) - (1 - lambda) * max_sim(c, selected)`
///
/// `relevance` is cosine similarity to `query`; `max_sim` is the largest
/// cosine similarity to an already selected candidate (0 for the first
/// pick). Vectors of a different length than the comparison side score 0.
/// Returns indices into `vectors` in selection order; ties go to the earlier
/// candidate.
pub fn mmr_select(vectors: &[Vec<f32>], query: &[f32], k: usize, lambda: f64) -> Vec<usize> {
    let n = vectors.len();
    let units: Vec<Vec<f32>> = vectors.iter().map(|v| normalize(v)).collect();
    let query = normalize(query);
    let sim = |a: &[f32], b: &[f32]| f64::from(cosine_similarity(a, b).unwrap_or(0.0));

    let relevance: Vec<f64> = units.iter().map(|v| sim(&query, v)).collect();
    let mut max_sim = vec![0.0f64; n];
    let mut used = vec![false; n];
    let mut selected = Vec::with_capacity(k.min(n));

    while selected.len() < k.min(n) {
        let mut best_score = -1e9;
        let mut best_idx = None;
        for i in 0..n {
            if used[i] {
                continue;
            }
            let score = lambda * relevance[i] - (1.0 - lambda) * max_sim[i];
            if score > best_score {
                best_score = score;
                best_idx = Some(i);
            }
        }

        let Some(pick) = best_idx else { break };
        used[pick] = true;
        selected.push(pick);

        for i in 0..n {
            if !used[i] {
                max_sim[i] = max_sim[i].max(sim(&units[i], &units[pick]));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_one_is_relevance_order() {
        let vectors = vec![
            vec![0.6, 0.8],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.9, 0.1],
        ];
        let picked = mmr_select(&vectors, &[1.0, 0.0], 4, 1.0);
        assert_eq!(picked, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_diversity_skips_near_duplicate() {
        // two near-identical vectors close to the query, one different
        let vectors = vec![vec![1.0, 0.0], vec![0.99, 0.01], vec![0.2, 1.0]];
        let query = [1.0, 0.3];
        assert_eq!(mmr_select(&vectors, &query, 2, 1.0), vec![1, 0]);
        assert_eq!(mmr_select(&vectors, &query, 2, 0.5), vec![1, 2]);
    }

    #[test]
    fn test_zero_vector_ranks_last() {
        let vectors = vec![vec![0.0, 0.0], vec![0.5, 0.5]];
        let picked = mmr_select(&vectors, &[1.0, 0.0], 2, 1.0);
        assert_eq!(picked, vec![1, 0]);
    }

    #[test]
    fn test_k_larger_than_pool() {
        let vectors = vec![vec![1.0, 0.0]];
        assert_eq!(mmr_select(&vectors, &[1.0, 0.0], 5, 0.5), vec![0]);
        assert!(mmr_select(&[], &[1.0, 0.0], 3, 0.5).is_empty());
    }
}
