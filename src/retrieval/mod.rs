//! Retrieval pipeline
//!
//! Embeds the question and its entity hints, unions the per-query hits,
//! deduplicates by chunk id, optionally reranks with Maximal Marginal
//! Relevance and assembles a character-bounded context block.

mod context;
mod deduplication;
mod hints;
mod mmr;
mod multi_query;

pub use context::{build_context, NO_MATCHES};
pub use deduplication::deduplicate_hits;
pub use hints::{HeuristicHintExtractor, HintExtractor, OllamaHintExtractor};
pub use mmr::mmr_select;
pub use multi_query::{MultiQueryRetriever, RetrievalResult};
