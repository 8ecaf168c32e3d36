//! Blocking client for OpenAI-compatible REST endpoints.
//!
//! Used for query/step embeddings and for the intent classifier's chat
//! completion. Every call runs with a request timeout and a bounded retry
//! loop with exponential backoff. Connection failures, timeouts, 429 and
//! 5xx responses are retried; other 4xx responses fail immediately.
//!
//! The client is blocking. Async callers must run it on the blocking pool.

mod chat;
mod embeddings;

pub use chat::{ChatClient, ChatCompletion, DEFAULT_CHAT_MODEL};
pub use embeddings::{DEFAULT_EMBEDDING_MODEL, OpenAiEmbeddingGenerator};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay,
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

#[derive(Error, Debug)]
pub enum OpenAiError {
    #[error(
        "OPENAI_API_KEY is not set\nSuggestion: Export OPENAI_API_KEY or set embedding.provider = \"local\""
    )]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {endpoint} failed: {message}")]
    Request {
        endpoint: String,
        message: String,
        retryable: bool,
    },

    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl OpenAiError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { retryable, .. } => *retryable,
            Self::Status { status, .. } => StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Shared HTTP plumbing for the embedding and chat endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, OpenAiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OpenAiError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry,
        })
    }

    /// Creates a client with the key from `OPENAI_API_KEY`.
    pub fn from_env(
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, OpenAiError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(OpenAiError::MissingApiKey)?;
        Self::new(base_url, api_key, timeout, retry)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POSTs `body` as JSON to `path` and decodes the JSON response,
    /// retrying transient failures according to the retry policy.
    pub fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, OpenAiError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let endpoint = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt = 1;

        loop {
            match self.send_once(&endpoint, body) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{endpoint} attempt {attempt}/{} failed, retrying in {}ms: {e}",
                        self.retry.max_attempts,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn send_once<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp, OpenAiError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        debug!("POST {endpoint}");
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|err| OpenAiError::Request {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
                retryable: err.is_connect() || err.is_timeout(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(OpenAiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: extract_error_message(&body_text),
            });
        }

        response.json().map_err(|err| OpenAiError::Decode {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pulls `error.message` out of an API error body, falling back to a
/// truncated raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}
