use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tablebot_contracts::{
    Actor, OutboundMessage, PushRequest, ReplyRequest, MAX_MESSAGES_PER_CALL,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("platform returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => is_retryable_status(*status),
            TransportError::Timeout(_) | TransportError::Connect(_) => true,
            TransportError::Request(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 499 | 500 | 502 | 503 | 504)
}

/// Outbound half of the messaging platform.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), TransportError>;

    async fn push(&self, to: &str, messages: &[OutboundMessage]) -> Result<(), TransportError>;
}

pub struct LineTransport {
    client: Client,
    api_base: String,
    access_token: String,
}

impl LineTransport {
    pub fn new(api_base: &str, access_token: &str, timeout_ms: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| format!("failed to build messaging client: {e}"))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn post<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessagingTransport for LineTransport {
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), TransportError> {
        let body = ReplyRequest {
            reply_token: reply_token.to_string(),
            messages: messages.to_vec(),
        };
        self.post("/v2/bot/message/reply", &body).await
    }

    async fn push(&self, to: &str, messages: &[OutboundMessage]) -> Result<(), TransportError> {
        let body = PushRequest {
            to: to.to_string(),
            messages: messages.to_vec(),
        };
        self.post("/v2/bot/message/push", &body).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)` plus a jitter in `[0, jitter_ms]` derived from
    /// `seed`, so a given call retries on the same schedule every time.
    pub fn delay_ms(&self, attempt: usize, seed: &str) -> u64 {
        if self.base_delay_ms == 0 {
            return 0;
        }
        let exponent = attempt.saturating_sub(1).min(10) as u32;
        let base_delay = self.base_delay_ms.saturating_mul(1_u64 << exponent);
        if self.jitter_ms == 0 {
            return base_delay;
        }
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(attempt.to_le_bytes());
        let digest = hasher.finalize();
        let mut seed_bytes = [0_u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let jitter = u64::from_le_bytes(seed_bytes) % self.jitter_ms.saturating_add(1);
        base_delay.saturating_add(jitter)
    }

    pub async fn run<T, E, F, Fut, C>(&self, seed: &str, is_retryable: C, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    let delay_ms = self.delay_ms(attempt, seed);
                    debug!(attempt, delay_ms, error = %err, "retrying delivery");
                    if delay_ms > 0 {
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Replied,
    Pushed,
    /// The reply path failed transiently and the push fallback succeeded.
    FellBack,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Replied => "replied",
            DeliveryOutcome::Pushed => "pushed",
            DeliveryOutcome::FellBack => "fell_back",
            DeliveryOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct DeliveryService {
    transport: Arc<dyn MessagingTransport>,
    retry: RetryPolicy,
}

impl DeliveryService {
    pub fn new(transport: Arc<dyn MessagingTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Answers an event. The reply token is single use, so only the first
    /// chunk can go through it; later chunks are pushed.
    pub async fn send(
        &self,
        reply_token: Option<&str>,
        address: &Actor,
        messages: Vec<OutboundMessage>,
    ) -> DeliveryOutcome {
        let mut chunks = messages.chunks(MAX_MESSAGES_PER_CALL);
        let Some(first) = chunks.next() else {
            return DeliveryOutcome::Replied;
        };

        let mut outcome = match reply_token.filter(|t| !t.is_empty()) {
            Some(token) => self.reply_then_push(token, address, first).await,
            None => self.push_chunk(address, first).await,
        };
        for chunk in chunks {
            if matches!(outcome, DeliveryOutcome::Failed(_)) {
                break;
            }
            if let DeliveryOutcome::Failed(reason) = self.push_chunk(address, chunk).await {
                outcome = DeliveryOutcome::Failed(reason);
            }
        }
        outcome
    }

    pub async fn push(&self, to: &Actor, messages: Vec<OutboundMessage>) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::Pushed;
        for chunk in messages.chunks(MAX_MESSAGES_PER_CALL) {
            outcome = self.push_chunk(to, chunk).await;
            if matches!(outcome, DeliveryOutcome::Failed(_)) {
                break;
            }
        }
        outcome
    }

    async fn reply_then_push(
        &self,
        token: &str,
        address: &Actor,
        chunk: &[OutboundMessage],
    ) -> DeliveryOutcome {
        let replied = self
            .retry
            .run(token, TransportError::is_retryable, || {
                self.transport.reply(token, chunk)
            })
            .await;
        match replied {
            Ok(()) => DeliveryOutcome::Replied,
            Err(err) if err.is_retryable() => {
                warn!(to = %address, error = %err, "reply failed, falling back to push");
                match self.push_chunk(address, chunk).await {
                    DeliveryOutcome::Pushed => DeliveryOutcome::FellBack,
                    other => other,
                }
            }
            Err(err) => {
                warn!(to = %address, error = %err, "reply rejected");
                DeliveryOutcome::Failed(err.to_string())
            }
        }
    }

    async fn push_chunk(&self, to: &Actor, chunk: &[OutboundMessage]) -> DeliveryOutcome {
        let seed = to.to_string();
        let pushed = self
            .retry
            .run(&seed, TransportError::is_retryable, || {
                self.transport.push(&to.id, chunk)
            })
            .await;
        match pushed {
            Ok(()) => DeliveryOutcome::Pushed,
            Err(err) => {
                warn!(to = %to, error = %err, "push failed");
                DeliveryOutcome::Failed(err.to_string())
            }
        }
    }
}
