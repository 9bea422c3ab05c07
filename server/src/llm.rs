//! Minimal client for OpenAI-compatible `/chat/completions` endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const ERROR_BODY_SNIPPET_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 2, initial_backoff: Duration::from_millis(500), max_backoff: Duration::from_secs(2) }
    }
}

impl RetryConfig {
    /// `attempt` is 1-based; the wait after the first failure is `initial_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.initial_backoff.saturating_mul(1u32 << exp);
        backoff.min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    /// Without a key the client echoes the prompt instead of calling out.
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Transport failure: connect, timeout, reset.
    #[error("network request failed: {message}")]
    Request { message: String, is_timeout: bool },

    /// The provider answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to deserialize response data: {0}")]
    Deserialization(String),

    #[error("response contained no message content")]
    EmptyResponse,
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request { .. } => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Client(_) | LlmError::Deserialization(_) | LlmError::EmptyResponse => false,
        }
    }

    /// Whether the request gave up waiting on the provider.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Request { is_timeout: true, .. })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn has_credentials(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a reply to `user` under the `system` prompt.
    ///
    /// Transient failures are retried with exponential backoff up to
    /// `retry.max_attempts`; the request carries no state, so repeating it is
    /// harmless.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let Some(api_key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(format!("[echo] {user}"));
        };

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(api_key, system, user).await {
                Ok(answer) => return Ok(answer),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let backoff = self.config.retry.backoff_for_attempt(attempt);
                    tracing::warn!(attempt, max_attempts, ?backoff, error = %err, "chat completion failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(attempt, max_attempts, error = %err, "chat completion failed");
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, api_key: &str, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: [WireMessage { role: "system", content: system }, WireMessage { role: "user", content: user }],
        };

        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request { message: e.to_string(), is_timeout: e.is_timeout() })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: text.chars().take(ERROR_BODY_SNIPPET_CHARS).collect(),
            });
        }

        let parsed: ChatCompletionResponse =
            resp.json().await.map_err(|e| LlmError::Deserialization(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config_for(base: String) -> LlmConfig {
        LlmConfig {
            api_base: base,
            model: "test-model".into(),
            api_key: Some("sk-test".into()),
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_secs(2));
        assert_eq!(retry.backoff_for_attempt(30), Duration::from_secs(2));
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::Request { message: "reset".into(), is_timeout: false }.is_transient());
        assert!(LlmError::Api { status: 429, message: String::new() }.is_transient());
        assert!(LlmError::Api { status: 503, message: String::new() }.is_transient());
        assert!(!LlmError::Api { status: 401, message: String::new() }.is_transient());
        assert!(!LlmError::EmptyResponse.is_transient());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"choices": [{"message": {"content": "too late"}}]}));
            })
            .await;

        let client = LlmClient::new(LlmConfig { timeout: Duration::from_millis(50), ..config_for(server.base_url()) }).unwrap();
        let err = client.complete("sys", "hi").await.unwrap_err();
        assert!(err.is_timeout(), "got {err:?}");
        assert!(err.is_transient());
        assert!(!LlmError::Request { message: "reset".into(), is_timeout: false }.is_timeout());
        assert!(!LlmError::Api { status: 504, message: String::new() }.is_timeout());
    }

    #[tokio::test]
    async fn echoes_without_api_key() {
        let client = LlmClient::new(LlmConfig::default()).unwrap();
        assert!(!client.has_credentials());
        assert_eq!(client.complete("sys", "hello").await.unwrap(), "[echo] hello");

        let blank = LlmClient::new(LlmConfig { api_key: Some(String::new()), ..LlmConfig::default() }).unwrap();
        assert_eq!(blank.complete("sys", "hi").await.unwrap(), "[echo] hi");
    }

    #[tokio::test]
    async fn returns_first_choice() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_contains("\"model\":\"test-model\"")
                    .body_contains("What is BM25?");
                then.status(200)
                    .json_body(json!({"choices": [{"message": {"role": "assistant", "content": "A ranking function."}}]}));
            })
            .await;

        let client = LlmClient::new(config_for(server.base_url())).unwrap();
        let answer = client.complete("be brief", "What is BM25?").await.unwrap();
        assert_eq!(answer, "A ranking function.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let client = LlmClient::new(config_for(server.base_url())).unwrap();
        let err = client.complete("sys", "hi").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 503, .. }), "got {err:?}");
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401).body("bad key");
            })
            .await;

        let client = LlmClient::new(config_for(server.base_url())).unwrap();
        let err = client.complete("sys", "hi").await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let client = LlmClient::new(config_for(server.base_url())).unwrap();
        assert!(matches!(client.complete("sys", "hi").await, Err(LlmError::EmptyResponse)));
    }
}
