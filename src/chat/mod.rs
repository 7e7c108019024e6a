//! Retrieval-augmented chat
//!
//! [`ChatClient`] is the seam to a generation backend; [`RagChat`] retrieves
//! library context for the latest user message and builds the outgoing
//! conversation around it.

mod ollama;
mod rag;

pub use ollama::OllamaChatClient;
pub use rag::{ChatAnswer, PreparedChat, RagChat, SYSTEM_PROMPT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Chat model is not configured")]
    NotConfigured,

    #[error("Chat backend unavailable: {0}")]
    Unavailable(String),

    #[error("Chat backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected chat response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn is_role(&self, role: &str) -> bool {
        self.role.eq_ignore_ascii_case(role)
    }
}

/// One frame of a streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Sampling options sent with every generation request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Reply length and sampling presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThinkMode {
    Fast,
    #[default]
    Medium,
    Long,
    XLong,
    Max,
}

impl ThinkMode {
    /// Case-insensitive; `short`, `very_long` and `deep` are aliases and
    /// anything unknown is `Medium`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "FAST" | "SHORT" => ThinkMode::Fast,
            "MEDIUM" => ThinkMode::Medium,
            "LONG" => ThinkMode::Long,
            "XLONG" | "VERY_LONG" | "DEEP" => ThinkMode::XLong,
            "MAX" => ThinkMode::Max,
            _ => ThinkMode::Medium,
        }
    }

    pub fn options(self) -> GenerationOptions {
        let (num_predict, temperature, top_p) = match self {
            ThinkMode::Fast => (256, 0.2, 0.9),
            ThinkMode::Medium => (512, 0.4, 0.95),
            ThinkMode::Long => (1024, 0.6, 0.98),
            ThinkMode::XLong => (2048, 0.7, 0.98),
            ThinkMode::Max => (4096, 0.7, 0.98),
        };
        GenerationOptions {
            num_predict,
            temperature,
            top_p,
        }
    }
}

impl fmt::Display for ThinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThinkMode::Fast => "FAST",
            ThinkMode::Medium => "MEDIUM",
            ThinkMode::Long => "LONG",
            ThinkMode::XLong => "XLONG",
            ThinkMode::Max => "MAX",
        };
        f.write_str(name)
    }
}

/// Generation backend
///
/// `chat_stream` returns immediately; the reply arrives on the receiver as
/// `Delta` frames closed by `Done` or `Error`. Cancelling the token aborts
/// the request and closes the channel without an `Error` frame.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String, ChatError>;

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError>;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_think_mode_parse() {
        assert_eq!(ThinkMode::parse("fast"), ThinkMode::Fast);
        assert_eq!(ThinkMode::parse(" short "), ThinkMode::Fast);
        assert_eq!(ThinkMode::parse("deep"), ThinkMode::XLong);
        assert_eq!(ThinkMode::parse("very_long"), ThinkMode::XLong);
        assert_eq!(ThinkMode::parse("Max"), ThinkMode::Max);
        assert_eq!(ThinkMode::parse("whatever"), ThinkMode::Medium);
        assert_eq!(ThinkMode::parse(""), ThinkMode::Medium);
    }

    #[test]
    fn test_think_mode_presets() {
        let fast = ThinkMode::Fast.options();
        assert_eq!(fast.num_predict, 256);
        assert_eq!(fast.temperature, 0.2);
        assert_eq!(fast.top_p, 0.9);

        assert_eq!(ThinkMode::Medium.options().num_predict, 512);
        assert_eq!(ThinkMode::Long.options().num_predict, 1024);
        assert_eq!(ThinkMode::XLong.options().num_predict, 2048);
        assert_eq!(ThinkMode::Max.options().num_predict, 4096);
    }

    #[test]
    fn test_message_roles() {
        assert!(ChatMessage::user("hi").is_role("USER"));
        assert!(!ChatMessage::assistant("hi").is_role("user"));
    }
}
