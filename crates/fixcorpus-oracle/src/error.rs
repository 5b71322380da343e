//! Error types for fixcorpus-oracle

use thiserror::Error;

use crate::OracleTask;

/// Errors an oracle call can produce.
///
/// Transport-level failures are split into transient (retried with backoff)
/// and permanent (surfaced immediately). A response that arrives but fails
/// the caller's own validation is not an `OracleError` at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("oracle rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("oracle returned a malformed envelope: {0}")]
    MalformedResponse(String),

    #[error("oracle call failed after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },

    #[error("no scripted response for {task} request")]
    Unscripted { task: OracleTask },

    #[error("invalid oracle configuration: {0}")]
    Config(String),
}

impl OracleError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OracleError::Timeout { .. } | OracleError::RateLimited { .. } | OracleError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Timeout { elapsed_ms: 0 }
        } else if err.is_decode() {
            OracleError::MalformedResponse(err.to_string())
        } else {
            OracleError::Unavailable(err.to_string())
        }
    }
}

/// Result type for oracle calls.
pub type OracleResult<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(OracleError::Timeout { elapsed_ms: 10 }.is_transient());
        assert!(OracleError::RateLimited {
            retry_after_ms: None
        }
        .is_transient());
        assert!(OracleError::Unavailable("502".into()).is_transient());
        assert!(!OracleError::Rejected {
            status: 400,
            body: "bad".into()
        }
        .is_transient());
        assert!(!OracleError::MalformedResponse("no choices".into()).is_transient());
        assert!(!OracleError::Exhausted {
            attempts: 3,
            reason: "timeout".into()
        }
        .is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = OracleError::Rejected {
            status: 401,
            body: "invalid api key".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("invalid api key"));
    }
}
