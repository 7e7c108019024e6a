use super::{ChatClient, ChatEvent, ChatMessage, ThinkMode};
use crate::error::{LibragError, Result};
use crate::index::SearchHit;
use crate::retrieval::MultiQueryRetriever;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Prefix of the system message; the retrieved context follows it
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the provided CONTEXT to answer the user's question.
If the answer is not clearly in the context, say you don't know.
Be concise and cite the source chunk like [source#chunk] when useful (e.g., [people_food.txt#0]).
CONTEXT:
";

/// Outgoing conversation plus what was retrieved for it
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub messages: Vec<ChatMessage>,
    pub system: String,
    pub latest_user: String,
    pub hits: Vec<SearchHit>,
    pub context: String,
    pub hints_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub model: String,
    pub answer: String,
    pub think: ThinkMode,
    pub hits: Vec<SearchHit>,
    pub context: String,
}

pub struct RagChat {
    retriever: Arc<MultiQueryRetriever>,
    client: Arc<dyn ChatClient>,
    default_top_k: usize,
    max_context_chars: usize,
}

impl RagChat {
    pub fn new(
        retriever: Arc<MultiQueryRetriever>,
        client: Arc<dyn ChatClient>,
        default_top_k: usize,
        max_context_chars: usize,
    ) -> Self {
        Self {
            retriever,
            client,
            default_top_k,
            max_context_chars,
        }
    }

    /// Retrieve context for the latest user message and build the messages
    /// to send: our system prompt first, then the caller's conversation
    /// without its own system messages
    pub async fn prepare(&self, messages: &[ChatMessage], top_k: Option<usize>) -> Result<PreparedChat> {
        if messages.is_empty() {
            return Err(LibragError::InvalidRequest("Missing 'messages'".to_string()));
        }
        if self.client.model_name().trim().is_empty() {
            return Err(LibragError::InvalidRequest(
                "Chat model is not configured (ollama.chat_model)".to_string(),
            ));
        }

        let latest_user = messages
            .iter()
            .rev()
            .find(|m| m.is_role("user"))
            .map(|m| m.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LibragError::InvalidRequest("No user message found in 'messages'".to_string()))?;

        let top_k = top_k.filter(|&k| k > 0).unwrap_or(self.default_top_k.max(1));
        let retrieved = self
            .retriever
            .retrieve(&latest_user, top_k, self.max_context_chars)
            .await?;

        let system = format!("{}{}", SYSTEM_PROMPT, retrieved.context);
        let mut outgoing = Vec::with_capacity(messages.len() + 1);
        outgoing.push(ChatMessage::system(system.clone()));
        outgoing.extend(messages.iter().filter(|m| !m.is_role("system")).cloned());

        Ok(PreparedChat {
            messages: outgoing,
            system,
            latest_user,
            hits: retrieved.hits,
            context: retrieved.context,
            hints_used: retrieved.hints_used,
        })
    }

    /// One-shot reply
    pub async fn ask(&self, messages: &[ChatMessage], top_k: Option<usize>, think: ThinkMode) -> Result<ChatAnswer> {
        let prepared = self.prepare(messages, top_k).await?;
        let answer = self.client.chat(&prepared.messages, think.options()).await?;
        Ok(ChatAnswer {
            model: self.client.model_name().to_string(),
            answer,
            think,
            hits: prepared.hits,
            context: prepared.context,
        })
    }

    /// Streamed reply; the prepared conversation is returned alongside so a
    /// caller can show the retrieved sources before the first delta
    pub async fn ask_stream(
        &self,
        messages: &[ChatMessage],
        top_k: Option<usize>,
        think: ThinkMode,
        cancel: CancellationToken,
    ) -> Result<(PreparedChat, mpsc::Receiver<ChatEvent>)> {
        let prepared = self.prepare(messages, top_k).await?;
        let rx = self
            .client
            .chat_stream(prepared.messages.clone(), think.options(), cancel)
            .await?;
        Ok((prepared, rx))
    }
}
