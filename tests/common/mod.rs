//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use librag::chat::{ChatClient, ChatError, ChatEvent, ChatMessage, GenerationOptions};
use librag::embedding::{EmbeddingError, EmbeddingProvider};
use librag::retrieval::HintExtractor;
use parking_lot::Mutex;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DIM: usize = 64;

/// Bag-of-words embedder: each lowercase word lands in a fixed bucket
///
/// Texts that share words get similar vectors.
pub struct WordEmbedder;

pub fn word_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let lc = word.to_lowercase();
        let bucket = lc
            .bytes()
            .fold(7u64, |h, b| h.wrapping_mul(131).wrapping_add(u64::from(b)))
            % (DIM as u64 - 1);
        v[bucket as usize] += 1.0;
    }
    // keeps every vector non-zero
    v[DIM - 1] = 0.05;
    v
}

#[async_trait]
impl EmbeddingProvider for WordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(word_vector(text))
    }

    fn model_name(&self) -> &str {
        "word-buckets"
    }
}

/// Fails for any text containing `needle`
pub struct FlakyEmbedder {
    pub needle: String,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(&self.needle) {
            Err(EmbeddingError::Unavailable("connection refused".to_string()))
        } else {
            Ok(word_vector(text))
        }
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

/// Returns a fixed hint list regardless of input
pub struct StaticHints(pub Vec<String>);

#[async_trait]
impl HintExtractor for StaticHints {
    async fn extract_hints(&self, _text: &str, max: usize) -> Vec<String> {
        self.0.iter().take(max).cloned().collect()
    }
}

pub fn no_hints() -> StaticHints {
    StaticHints(Vec::new())
}

/// Records what it was asked and answers with a canned reply
pub struct RecordingChat {
    pub model: String,
    pub reply: String,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingChat {
    pub fn new(reply: &str) -> Self {
        Self {
            model: "test-chat".to_string(),
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn chat(&self, messages: &[ChatMessage], _options: GenerationOptions) -> Result<String, ChatError> {
        self.seen.lock().push(messages.to_vec());
        Ok(self.reply.clone())
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        _options: GenerationOptions,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        self.seen.lock().push(messages);
        let (tx, rx) = mpsc::channel(8);
        let reply = self.reply.clone();
        tokio::spawn(async move {
            for word in reply.split_inclusive(' ') {
                let _ = tx.send(ChatEvent::Delta(word.to_string())).await;
            }
            let _ = tx.send(ChatEvent::Done).await;
        });
        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
