//! Entity hints: short names and keywords pulled from a query to drive
//! extra retrieval passes

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Extracts up to `max` hint strings from a query
///
/// Never fails: implementations degrade to fewer (or zero) hints.
#[async_trait]
pub trait HintExtractor: Send + Sync {
    async fn extract_hints(&self, text: &str, max: usize) -> Vec<String>;
}

const STOP: &[&str] = &[
    "Who", "What", "When", "Where", "Which", "Why", "How", "Is", "Are", "Do", "Does", "Did", "And",
    "Or", "The", "A", "An", "About", "Please", "Tell", "Me", "You", "It", "This", "That", "Vs",
    "Than", "Smaller", "Bigger", "Greater", "Larger", "Less", "More", "Pokemon", "Pokémon",
];

fn capitalized_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][\p{L}0-9_-]*(?:\s+[A-Z][\p{L}0-9_-]*)*)\b")
            .expect("capitalized pattern is valid")
    })
}

fn like_a_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\blike\s+(?:a|an)\s+([a-z][a-z-]{2,})\b").expect("like pattern is valid")
    })
}

fn singularize(word: &str) -> String {
    if word.len() > 3 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.ends_with("ses") || word.ends_with("xes") {
        word[..word.len() - 2].to_string()
    } else if word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Insertion-ordered set capped at `max`
struct HintSet {
    seen: HashSet<String>,
    out: Vec<String>,
    max: usize,
}

impl HintSet {
    fn new(max: usize) -> Self {
        Self {
            seen: HashSet::new(),
            out: Vec::new(),
            max,
        }
    }

    fn full(&self) -> bool {
        self.out.len() >= self.max
    }

    fn push(&mut self, hint: String) {
        if !self.full() && !hint.is_empty() && self.seen.insert(hint.clone()) {
            self.out.push(hint);
        }
    }
}

/// Local fallback: capitalized word runs (minus question words and filler),
/// then "like a/an X" constructs turned into a singular capitalized noun
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicHintExtractor;

impl HeuristicHintExtractor {
    pub fn extract(text: &str, max: usize) -> Vec<String> {
        let mut hints = HintSet::new(max.max(1));

        for caps in capitalized_runs().captures_iter(text) {
            if hints.full() {
                break;
            }
            // a run like "Is Pikachu" keeps only its meaningful core
            let words: Vec<&str> = caps[1].split_whitespace().collect();
            let start = words.iter().position(|w| !STOP.contains(w));
            let end = words.iter().rposition(|w| !STOP.contains(w));
            if let (Some(s), Some(e)) = (start, end) {
                hints.push(words[s..=e].join(" "));
            }
        }

        for caps in like_a_pattern().captures_iter(text) {
            if hints.full() {
                break;
            }
            hints.push(capitalize(&singularize(&caps[1])));
        }

        hints.out
    }
}

#[async_trait]
impl HintExtractor for HeuristicHintExtractor {
    async fn extract_hints(&self, text: &str, max: usize) -> Vec<String> {
        Self::extract(text, max)
    }
}

const HINT_SYSTEM_PROMPT: &str = "Extract concise entity hints from the USER text.
- Include proper names (people, products, characters), AND domain keywords useful for retrieval.
- Do not include stopwords or filler.
- Return ONLY a compact JSON array of strings on a single line, no prose, no code fences.
Example: [\"EntityA\",\"CountryB\",\"PersonC\"]";

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Isolate the first `[...]` block of a model reply, ignoring code fences
fn json_array_block(raw: &str) -> Option<&str> {
    let t = raw.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    let t = t.trim().strip_suffix("```").unwrap_or(t).trim();
    let start = t.find('[')?;
    let end = t.rfind(']')?;
    (end > start).then(|| &t[start..=end])
}

/// Parse the model reply into distinct non-empty strings, at most `max`
fn parse_hint_reply(raw: &str, max: usize) -> Option<Vec<String>> {
    let block = json_array_block(raw)?;
    let values: Vec<serde_json::Value> = serde_json::from_str(block).ok()?;
    let mut hints = HintSet::new(max);
    for value in values {
        if let Some(s) = value.as_str() {
            hints.push(s.trim().to_string());
        }
        if hints.full() {
            break;
        }
    }
    Some(hints.out)
}

/// Asks a local model for hints through `POST /api/generate`; any failure
/// falls back to [`HeuristicHintExtractor`]
pub struct OllamaHintExtractor {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaHintExtractor {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn ask_model(&self, text: &str, max: usize) -> Result<String, reqwest::Error> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: format!(
                "USER: {}\nNow return a JSON array with at most {} items.",
                text, max
            ),
            system: HINT_SYSTEM_PROMPT,
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 128,
            },
        };
        let resp: GenerateResponse = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.response)
    }
}

#[async_trait]
impl HintExtractor for OllamaHintExtractor {
    async fn extract_hints(&self, text: &str, max: usize) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let max = max.max(1);
        if self.model.trim().is_empty() {
            return HeuristicHintExtractor::extract(text, max);
        }

        match self.ask_model(text, max).await {
            Ok(raw) => match parse_hint_reply(&raw, max) {
                Some(hints) => hints,
                None => {
                    tracing::debug!("Hint model reply had no JSON array; using heuristic");
                    HeuristicHintExtractor::extract(text, max)
                }
            },
            Err(e) => {
                tracing::debug!("Hint model request failed ({}); using heuristic", e);
                HeuristicHintExtractor::extract(text, max)
            }
        }
    }
}
