/// Ollama embedding client
use super::{EmbeddingError, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Embeds text through a local Ollama server
///
/// Prefers `POST /api/embed {model, input}` and retries once with the older
/// `POST /api/embeddings {model, prompt}` when the first call answers with an
/// error status or a body without a recognizable vector.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Serialize)]
struct LegacyEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// `embeddings` is nested (`[[...]]`) on newer servers and flat on some others
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingsField {
    Nested(Vec<Vec<f32>>),
    Flat(Vec<f32>),
}

#[derive(Deserialize, Default)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Option<EmbeddingsField>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl EmbedResponse {
    fn into_vector(self) -> Option<Vec<f32>> {
        let from_plural = match self.embeddings {
            Some(EmbeddingsField::Nested(rows)) => rows.into_iter().next(),
            Some(EmbeddingsField::Flat(v)) => Some(v),
            None => None,
        };
        from_plural
            .filter(|v| !v.is_empty())
            .or(self.embedding)
            .filter(|v| !v.is_empty())
    }
}

enum CallError {
    Transport(reqwest::Error),
    Status(StatusCode, String),
    Shape(String),
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, model)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        if model.trim().is_empty() {
            tracing::warn!("No embedding model configured (ollama.embedding_model is empty)");
        } else {
            tracing::info!("Embedding client using model: {}", model);
        }
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
        }
    }

    async fn call<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<f32>, CallError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(CallError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Status(status, body));
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Shape(format!("{} body: {}", path, e)))?;
        parsed
            .into_vector()
            .ok_or_else(|| CallError::Shape(format!("no embedding in {} response", path)))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.model.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured);
        }

        let primary = EmbedRequest {
            model: &self.model,
            input: text,
        };
        match self.call("/api/embed", &primary).await {
            Ok(vector) => return Ok(vector),
            Err(CallError::Transport(e)) => {
                return Err(EmbeddingError::Unavailable(format!(
                    "Embedding request failed: {}",
                    e
                )));
            }
            Err(CallError::Status(status, _)) => {
                tracing::debug!("/api/embed failed with {}, trying /api/embeddings", status);
            }
            Err(CallError::Shape(msg)) => {
                tracing::debug!("Unexpected /api/embed response ({}), trying /api/embeddings", msg);
            }
        }

        let legacy = LegacyEmbedRequest {
            model: &self.model,
            prompt: text,
        };
        match self.call("/api/embeddings", &legacy).await {
            Ok(vector) => Ok(vector),
            Err(CallError::Transport(e)) => Err(EmbeddingError::Unavailable(format!(
                "Embedding fallback request failed: {}",
                e
            ))),
            Err(CallError::Status(status, body)) => Err(EmbeddingError::Unavailable(format!(
                "/api/embeddings returned {}: {}",
                status, body
            ))),
            Err(CallError::Shape(msg)) => Err(EmbeddingError::UnexpectedResponse(msg)),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Option<Vec<f32>> {
        serde_json::from_str::<EmbedResponse>(json)
            .unwrap()
            .into_vector()
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(parse(r#"{"embeddings":[[0.1,0.2]]}"#), Some(vec![0.1, 0.2]));
        assert_eq!(parse(r#"{"embeddings":[0.3,0.4]}"#), Some(vec![0.3, 0.4]));
        assert_eq!(parse(r#"{"embedding":[0.5]}"#), Some(vec![0.5]));
        assert_eq!(parse(r#"{"model":"x"}"#), None);
        assert_eq!(parse(r#"{"embeddings":[]}"#), None);
    }

    #[tokio::test]
    async fn test_blank_model_is_not_configured() {
        // unroutable base URL: no request may be attempted
        let embedder = OllamaEmbedder::new("http://127.0.0.1:9", "  ");
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::NotConfigured));
    }
}
