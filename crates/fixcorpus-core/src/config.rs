//! Pipeline configuration.
//!
//! Every section has defaults; a TOML file may override any field, and the
//! oracle endpoint, model and key may be overridden from the environment.

use std::path::Path;

use chrono::{DateTime, Utc};
use fixcorpus_oracle::{OracleConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

const SECURITY_ACTIONS: &[&str] = &[
    "fix", "patch", "repair", "mitigate", "prevent", "protect", "secure", "security",
    "safeguard", "sanitize", "validate", "check", "audit", "review", "block", "filter",
    "exploit", "attack", "threat", "crash", "corruption", "bypass", "break", "vulnerable",
    "vulnerability", "vuln", "cve", "advisory", "security-issue",
];

const VULNERABILITY_TYPES: &[&str] = &[
    "overflow", "underflow", "memory", "free", "malloc", "leak", "uaf", "use-after-free",
    "heap", "stack", "buffer", "bounds", "null", "nullptr", "null-pointer", "race",
    "deadlock", "concurrency", "injection", "sql", "xss", "csrf", "integer", "divide",
    "format", "string", "privilege", "permission", "sandbox", "escape",
];

const PROBLEM_DESCRIPTIONS: &[&str] = &[
    "bug", "issue", "defect", "unsafe", "insecure", "dangerous", "missing", "improper",
    "incorrect", "broken", "invalid", "malicious", "unauthorized", "unauth", "compromise",
    "breach", "critical", "severe",
];

/// Well-known APIs, types and error codes that never carry a useful definition.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "strcmp", "strncpy", "strcpy", "strlen", "memset", "memcpy", "fprintf", "exit", "malloc",
    "free", "sizeof", "getenv", "stat", "perror", "closesocket", "htons", "sscanf", "strrchr",
    "strchr", "tolower", "toupper", "char", "unsigned char", "size_t", "uint16_t", "uint8_t",
    "NULL", "errno", "ENOMEM", "EIO", "EINVAL", "EAGAIN", "EPERM", "ENOENT", "EEXIST", "EPIPE",
    "ERANGE", "EACCES", "EFAULT", "EBUSY", "ENODEV", "EOVERFLOW", "ETIMEDOUT", "EINTR",
    "ECANCELED", "EADDRINUSE", "ENOTSUP", "EISDIR", "ENOTDIR", "ENOTEMPTY",
];

/// Error-code-like names and numeric literals.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"^E[A-Z0-9]+$",
    r"^(?:0[xX][0-9A-Fa-f]+|[0-9]+)[uUlL]*$",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// S0 keyword retrieval and deterministic size/shape filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub keywords: Vec<String>,
    /// Commits whose rendered diff exceeds this many characters are dropped
    pub max_diff_chars: usize,
    /// Commits whose diff has more tokens than this are dropped
    pub max_diff_tokens: usize,
    pub extensions: Vec<String>,
    pub single_file: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let keywords = VULNERABILITY_TYPES
            .iter()
            .chain(SECURITY_ACTIONS)
            .chain(PROBLEM_DESCRIPTIONS)
            .map(|s| s.to_string())
            .collect();
        Self {
            keywords,
            max_diff_chars: 1_000_000,
            max_diff_tokens: 1_000,
            extensions: strings(&["c", "cc", "cpp", "h"]),
            single_file: true,
        }
    }
}

/// S1 function-pair constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Before-bodies with at least this many tokens are dropped
    pub max_function_tokens: usize,
    /// Commits at or after this instant are dropped
    pub cutoff: DateTime<Utc>,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            max_function_tokens: 1_000,
            // 2023-01-01T00:00:00Z
            cutoff: DateTime::from_timestamp(1_672_531_200, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    pub placeholder_prefix: String,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            placeholder_prefix: "MASK".to_string(),
        }
    }
}

/// S2b element filtering policy and prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub denylist: Vec<String>,
    /// Regexes; a name matching any of them is dropped
    pub deny_patterns: Vec<String>,
    pub min_name_len: usize,
    /// Lines of context on each side of the mask sent to extraction
    pub context_lines: usize,
    /// Reject records left with no undefined element after filtering
    pub drop_without_elements: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            denylist: strings(DEFAULT_DENYLIST),
            deny_patterns: strings(DEFAULT_DENY_PATTERNS),
            min_name_len: 3,
            context_lines: 3,
            drop_without_elements: true,
        }
    }
}

/// Per-stage worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum records in flight at once
    pub concurrency: usize,
    /// Records committed per output/cursor write
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            batch_size: 64,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retrieval: RetrievalConfig,
    pub refine: RefineConfig,
    pub mask: MaskConfig,
    pub resolver: ResolverConfig,
    pub worker: WorkerConfig,
    pub oracle: OracleConfig,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        let config = Self {
            oracle: config.oracle.clone().with_env_overrides(),
            ..config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> PipelineResult<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> PipelineResult<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Reject configurations no stage could run with.
    pub fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: &str| Err(PipelineError::Config(msg.to_string()));
        if self.worker.concurrency == 0 {
            return fail("worker.concurrency must be at least 1");
        }
        if self.worker.batch_size == 0 {
            return fail("worker.batch_size must be at least 1");
        }
        if self.retrieval.keywords.iter().all(|k| k.trim().is_empty()) {
            return fail("retrieval.keywords must not be empty");
        }
        if self.retrieval.extensions.is_empty() {
            return fail("retrieval.extensions must not be empty");
        }
        if self.mask.placeholder_prefix.is_empty()
            || !self
                .mask
                .placeholder_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return fail("mask.placeholder_prefix must be a non-empty identifier");
        }
        for pattern in &self.resolver.deny_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                PipelineError::Config(format!("resolver.deny_patterns: {pattern}: {e}"))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.max_diff_chars, 1_000_000);
        assert_eq!(config.retrieval.max_diff_tokens, 1_000);
        assert!(config.retrieval.keywords.contains(&"use-after-free".to_string()));
        assert_eq!(config.refine.cutoff.to_rfc3339(), "2023-01-01T00:00:00+00:00");
        assert!(config.resolver.denylist.contains(&"errno".to_string()));
        assert_eq!(config.resolver.min_name_len, 3);
        assert!(config.resolver.drop_without_elements);
        assert_eq!(config.worker.concurrency, 8);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
[worker]
concurrency = 2

[refine]
cutoff = "2021-06-01T00:00:00Z"

[oracle]
model = "coder-7b"

[resolver]
drop_without_elements = false
"#,
        )
        .unwrap();
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.batch_size, 64);
        assert_eq!(config.refine.max_function_tokens, 1_000);
        assert_eq!(config.refine.cutoff.to_rfc3339(), "2021-06-01T00:00:00+00:00");
        assert_eq!(config.oracle.model, "coder-7b");
        assert!(!config.resolver.drop_without_elements);
        assert_eq!(config.resolver.context_lines, 3);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = PipelineConfig::default();
        config.worker.concurrency = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.resolver.deny_patterns.push("(unclosed".into());
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.retrieval.keywords = vec![" ".into()];
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        assert!(PipelineConfig::from_toml("worker = 3").is_err());
    }

    #[test]
    fn load_reads_file_and_rejects_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixcorpus.toml");
        std::fs::write(&path, "[mask]\nplaceholder_prefix = \"HOLE\"\n").unwrap();
        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.mask.placeholder_prefix, "HOLE");

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            PipelineConfig::load(Some(&missing)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn toml_round_trip() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        let back = PipelineConfig::from_toml(&text).unwrap();
        assert_eq!(back, config);
    }
}
