use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

pub const NO_ANSWER: &str = "（AI 暫時沒有回覆）";
pub const DEGRADED_ANSWER: &str = "（AI 回應異常，請稍後再試）";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Transport(String),
    #[error("chat endpoint returned status {0}")]
    Status(u16),
    #[error("chat response was not understood: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    /// Answer text, or `None` when the model produced nothing.
    async fn complete(&self, question: &str) -> Result<Option<String>, ChatError>;
}

/// OpenAI-compatible chat completions endpoint.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChat {
    pub fn new(endpoint: &str, api_key: Option<&str>, model: &str) -> Result<Self, String> {
        let client = Client::builder()
            .build()
            .map_err(|e| format!("failed to build chat client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(&self, question: &str) -> Result<Option<String>, ChatError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": question}],
            "temperature": 0.7,
            "top_p": 0.95,
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChatError::Status(response.status().as_u16()));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        Ok(first_choice_content(&value))
    }
}

fn first_choice_content(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Chat with a hard deadline. Never fails: errors and timeouts become a
/// canned answer.
#[derive(Clone)]
pub struct ChatService {
    completer: Option<Arc<dyn ChatCompleter>>,
    timeout: Duration,
}

impl ChatService {
    pub fn new(completer: Option<Arc<dyn ChatCompleter>>, timeout_ms: u64) -> Self {
        Self {
            completer,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub async fn answer(&self, question: &str) -> String {
        let Some(completer) = &self.completer else {
            return NO_ANSWER.to_string();
        };
        match tokio::time::timeout(self.timeout, completer.complete(question)).await {
            Ok(Ok(Some(answer))) => answer,
            Ok(Ok(None)) => NO_ANSWER.to_string(),
            Ok(Err(err)) => {
                warn!(error = %err, "chat completion failed");
                DEGRADED_ANSWER.to_string()
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "chat completion timed out");
                DEGRADED_ANSWER.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl ChatCompleter for Slow {
        async fn complete(&self, _question: &str) -> Result<Option<String>, ChatError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some("late".to_string()))
        }
    }

    struct Failing;

    #[async_trait]
    impl ChatCompleter for Failing {
        async fn complete(&self, _question: &str) -> Result<Option<String>, ChatError> {
            Err(ChatError::Status(500))
        }
    }

    struct Echo;

    #[async_trait]
    impl ChatCompleter for Echo {
        async fn complete(&self, question: &str) -> Result<Option<String>, ChatError> {
            Ok(Some(format!("echo: {question}")))
        }
    }

    #[tokio::test]
    async fn timeout_yields_degraded_answer() {
        let chat = ChatService::new(Some(Arc::new(Slow)), 20);
        assert_eq!(chat.answer("q").await, DEGRADED_ANSWER);
    }

    #[tokio::test]
    async fn error_yields_degraded_answer() {
        let chat = ChatService::new(Some(Arc::new(Failing)), 1_000);
        assert_eq!(chat.answer("q").await, DEGRADED_ANSWER);
    }

    #[tokio::test]
    async fn answer_passes_through() {
        let chat = ChatService::new(Some(Arc::new(Echo)), 1_000);
        assert_eq!(chat.answer("hi").await, "echo: hi");
    }

    #[tokio::test]
    async fn disabled_chat_has_no_answer() {
        let chat = ChatService::new(None, 1_000);
        assert_eq!(chat.answer("hi").await, NO_ANSWER);
    }

    #[test]
    fn first_choice_is_extracted() {
        let value = json!({"choices": [{"message": {"content": " 你好 "}}]});
        assert_eq!(first_choice_content(&value).as_deref(), Some("你好"));
        assert_eq!(first_choice_content(&json!({"choices": []})), None);
    }
}
