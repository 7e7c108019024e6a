//! Ollama chat client: `/api/chat` with a `/api/generate` fallback and
//! newline-delimited JSON streaming

use super::{ChatClient, ChatError, ChatEvent, ChatMessage, GenerationOptions};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const KEEP_ALIVE: &str = "5m";

pub struct OllamaChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: GenerationOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerationOptions,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Body of a non-streamed reply and of every streamed frame
#[derive(Deserialize, Default)]
struct ReplyFrame {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
}

impl ReplyFrame {
    fn text(self) -> Option<String> {
        self.message.and_then(|m| m.content).or(self.response)
    }
}

enum CallError {
    Transport(reqwest::Error),
    Status(u16, String),
}

impl From<CallError> for ChatError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Transport(e) => ChatError::Unavailable(e.to_string()),
            CallError::Status(status, body) => ChatError::Status { status, body },
        }
    }
}

impl OllamaChatClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, CallError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(CallError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Status(status.as_u16(), body));
        }
        Ok(resp)
    }

    async fn generate_fallback(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String, ChatError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.is_role("user"))
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let system = messages
            .iter()
            .find(|m| m.is_role("system"))
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            options,
        };
        let frame: ReplyFrame = self
            .post("/api/generate", &body)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::UnexpectedResponse(e.to_string()))?;
        Ok(frame.response.unwrap_or_else(|| "[no content]".to_string()))
    }
}

#[async_trait]
impl ChatClient for OllamaChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String, ChatError> {
        if self.model.trim().is_empty() {
            return Err(ChatError::NotConfigured);
        }

        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options,
            keep_alive: None,
        };
        match self.post("/api/chat", &body).await {
            Ok(resp) => {
                let frame: ReplyFrame = resp
                    .json()
                    .await
                    .map_err(|e| ChatError::UnexpectedResponse(e.to_string()))?;
                Ok(frame.text().unwrap_or_else(|| "[no content]".to_string()))
            }
            Err(CallError::Status(status, _)) => {
                debug!("/api/chat failed with {}, falling back to /api/generate", status);
                self.generate_fallback(messages, options).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        if self.model.trim().is_empty() {
            return Err(ChatError::NotConfigured);
        }

        let (tx, rx) = mpsc::channel::<ChatEvent>(256);
        let http = self.http.clone();
        let url = format!("{}/api/chat", self.base_url);
        let model = self.model.clone();

        tokio::spawn(async move {
            let body = ChatRequest {
                model: &model,
                messages: &messages,
                stream: true,
                options,
                keep_alive: Some(KEEP_ALIVE),
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Chat stream cancelled");
                }
                _ = stream_reply(&http, &url, &body, &tx) => {}
            }
        });

        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Drive one streamed request, forwarding frames until `done` or end of body
async fn stream_reply(
    http: &reqwest::Client,
    url: &str,
    body: &ChatRequest<'_>,
    tx: &mpsc::Sender<ChatEvent>,
) {
    let resp = match http.post(url).json(body).send().await {
        Ok(r) => r,
        Err(e) => {
            let _ = tx.send(ChatEvent::Error(format!("Chat request failed: {}", e))).await;
            return;
        }
    };
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let _ = tx
            .send(ChatEvent::Error(format!("Ollama chat API returned {}: {}", status, text)))
            .await;
        return;
    }

    let mut bytes = resp.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            match handle_line(&line, tx).await {
                LineOutcome::Continue => {}
                LineOutcome::Finished => return,
            }
        }

        match bytes.next().await {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            Some(Err(e)) => {
                let _ = tx.send(ChatEvent::Error(format!("Stream read error: {}", e))).await;
                return;
            }
            None => break,
        }
    }

    // a final frame without trailing newline
    if let LineOutcome::Continue = handle_line(&buffer, tx).await {
        let _ = tx.send(ChatEvent::Done).await;
    }
}

enum LineOutcome {
    Continue,
    Finished,
}

async fn handle_line(line: &[u8], tx: &mpsc::Sender<ChatEvent>) -> LineOutcome {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Continue;
    }

    let frame: ReplyFrame = match serde_json::from_str(line) {
        Ok(f) => f,
        Err(e) => {
            warn!("Skipping malformed chat frame: {}", e);
            return LineOutcome::Continue;
        }
    };
    let done = frame.done;
    if let Some(delta) = frame.text().filter(|t| !t.is_empty()) {
        if tx.send(ChatEvent::Delta(delta)).await.is_err() {
            // receiver dropped
            return LineOutcome::Finished;
        }
    }
    if done {
        let _ = tx.send(ChatEvent::Done).await;
        return LineOutcome::Finished;
    }
    LineOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_frame_text() {
        let chat: ReplyFrame =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(chat.text().as_deref(), Some("Hi"));

        let gen: ReplyFrame = serde_json::from_str(r#"{"response":"Yo","done":true}"#).unwrap();
        assert!(gen.done);
        assert_eq!(gen.text().as_deref(), Some("Yo"));

        let empty: ReplyFrame = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert_eq!(empty.text(), None);
    }

    #[tokio::test]
    async fn test_handle_line_forwards_and_finishes() {
        let (tx, mut rx) = mpsc::channel(8);
        assert!(matches!(
            handle_line(br#"{"message":{"content":"a"}}"#, &tx).await,
            LineOutcome::Continue
        ));
        assert!(matches!(handle_line(b"not json", &tx).await, LineOutcome::Continue));
        assert!(matches!(
            handle_line(br#"{"message":{"content":""},"done":true}"#, &tx).await,
            LineOutcome::Finished
        ));
        drop(tx);

        assert_eq!(rx.recv().await, Some(ChatEvent::Delta("a".to_string())));
        assert_eq!(rx.recv().await, Some(ChatEvent::Done));
        assert_eq!(rx.recv().await, None);
    }
}
