//! OpenAI-compatible chat-completions transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OracleError, OracleResult};
use crate::{Oracle, OracleRequest};

/// Connection and sampling settings for [`HttpOracle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL, e.g. `http://localhost:8000/v1`
    pub endpoint: String,
    /// Model name sent in each request
    pub model: String,
    /// Bearer token (optional for local servers)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Transport-level request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            endpoint: "http://localhost:8000/v1".to_string(),
            model: "default".to_string(),
            api_key: None,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 2048,
            timeout_ms: 60_000,
        }
    }
}

impl OracleConfig {
    /// Defaults overridden by `FIXCORPUS_ORACLE_URL`, `FIXCORPUS_ORACLE_MODEL`
    /// and `FIXCORPUS_ORACLE_API_KEY`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("FIXCORPUS_ORACLE_URL") {
            self.endpoint = url;
        }
        if let Ok(model) = std::env::var("FIXCORPUS_ORACLE_MODEL") {
            self.model = model;
        }
        if let Ok(key) = std::env::var("FIXCORPUS_ORACLE_API_KEY") {
            self.api_key = Some(key);
        }
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Oracle backed by an HTTP chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    config: OracleConfig,
    client: reqwest::Client,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> OracleResult<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(OracleError::Config("endpoint must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn body<'a>(&'a self, request: &'a OracleRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !request.prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt.user,
        });
        ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
        }
    }
}

/// Map a non-success status to an oracle error.
fn status_error(status: u16, retry_after: Option<&str>, body: String) -> OracleError {
    match status {
        429 => OracleError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000),
        },
        500..=599 => OracleError::Unavailable(format!("status {status}: {body}")),
        _ => OracleError::Rejected { status, body },
    }
}

/// Pull the first choice's content out of a response body.
fn extract_content(raw: &str) -> OracleResult<String> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| OracleError::MalformedResponse("response has no message content".into()))
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, request: &OracleRequest) -> OracleResult<String> {
        let mut builder = self
            .client
            .post(self.config.completions_url())
            .json(&self.body(request));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(task = %request.task, model = %self.config.model, "oracle request");
        let response = builder.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), retry_after.as_deref(), text));
        }
        extract_content(&text)
    }
}
