//! fixcorpus-oracle: the LLM oracle as an injectable capability
//!
//! The pipeline never talks to a model directly. Every semantic judgment
//! goes through [`Oracle::complete`] with a fixed [`OracleTask`], and all
//! structure is imposed afterwards by the caller's parsers.
//!
//! ## Layer 1 - Collaborators
//!
//! - [`HttpOracle`]: OpenAI-compatible chat-completions transport
//! - [`RetryingOracle`]: timeout + exponential backoff for transient errors
//! - [`ScriptedOracle`]: deterministic stub for tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod http;
pub mod retry;
pub mod scripted;

pub use error::{OracleError, OracleResult};
pub use http::{HttpOracle, OracleConfig};
pub use retry::{RetryPolicy, RetryingOracle};
pub use scripted::{ScriptedOracle, ScriptedReply};

/// The kind of judgment requested from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleTask {
    /// S0: is this commit a vulnerability fix?
    Classify,
    /// S2a: smallest vulnerable block in the before-body
    Mask,
    /// S2b: identifiers around the masked span
    Extract,
    /// S2b: definitions of the extracted identifiers
    Resolve,
    /// S3: vulnerable span from the before-body alone
    Locate,
    /// S3: root cause and impact
    Explain,
}

impl OracleTask {
    pub fn name(&self) -> &'static str {
        match self {
            OracleTask::Classify => "classify",
            OracleTask::Mask => "mask",
            OracleTask::Extract => "extract",
            OracleTask::Resolve => "resolve",
            OracleTask::Locate => "locate",
            OracleTask::Explain => "explain",
        }
    }
}

impl std::fmt::Display for OracleTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A system/user message pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// One oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub task: OracleTask,
    pub prompt: Prompt,
}

impl OracleRequest {
    pub fn new(task: OracleTask, prompt: Prompt) -> Self {
        Self { task, prompt }
    }
}

/// Request/response text oracle.
///
/// Non-deterministic, rate limited and possibly wrong. Implementations only
/// move text; they never validate the content of an answer.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send one request and return the raw response text.
    async fn complete(&self, request: &OracleRequest) -> OracleResult<String>;

    async fn classify(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Classify, prompt))
            .await
    }

    async fn mask(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Mask, prompt))
            .await
    }

    async fn extract(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Extract, prompt))
            .await
    }

    async fn resolve(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Resolve, prompt))
            .await
    }

    async fn locate(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Locate, prompt))
            .await
    }

    async fn explain(&self, prompt: Prompt) -> OracleResult<String> {
        self.complete(&OracleRequest::new(OracleTask::Explain, prompt))
            .await
    }
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for std::sync::Arc<T> {
    async fn complete(&self, request: &OracleRequest) -> OracleResult<String> {
        (**self).complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_are_stable() {
        assert_eq!(OracleTask::Classify.name(), "classify");
        assert_eq!(OracleTask::Explain.to_string(), "explain");
        let json = serde_json::to_string(&OracleTask::Resolve).unwrap();
        assert_eq!(json, "\"resolve\"");
    }

    #[tokio::test]
    async fn convenience_methods_tag_the_task() {
        let oracle = ScriptedOracle::new()
            .on(OracleTask::Locate, None, ScriptedReply::text("located"))
            .on(OracleTask::Explain, None, ScriptedReply::text("explained"));

        assert_eq!(
            oracle.locate(Prompt::new("s", "u")).await.unwrap(),
            "located"
        );
        assert_eq!(
            oracle.explain(Prompt::new("s", "u")).await.unwrap(),
            "explained"
        );
        assert_eq!(oracle.calls_for(OracleTask::Locate), 1);
        assert_eq!(oracle.calls_for(OracleTask::Classify), 0);
    }
}
