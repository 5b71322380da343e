//! Deterministic oracle stub (testing and dry runs)
//!
//! Responses are scripted per task, optionally guarded by a substring that
//! must appear in the user message. Rules are checked in insertion order;
//! the first match wins. Every request is recorded.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{OracleError, OracleResult};
use crate::{Oracle, OracleRequest, OracleTask};

/// What a scripted rule answers with.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Always this text.
    Text(String),
    /// Always this error.
    Error(OracleError),
    /// Fail with `error` for the first `times` matching calls, then answer `text`.
    FailThen {
        times: u32,
        error: OracleError,
        text: String,
    },
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

#[derive(Debug)]
struct Rule {
    task: OracleTask,
    needle: Option<String>,
    reply: ScriptedReply,
    hits: u32,
}

/// Oracle stub with scripted, deterministic answers.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule (builder style). `needle` restricts the rule to requests
    /// whose user message contains it.
    pub fn on(self, task: OracleTask, needle: Option<&str>, reply: ScriptedReply) -> Self {
        self.push(task, needle, reply);
        self
    }

    /// Add a rule to an existing oracle.
    pub fn push(&self, task: OracleTask, needle: Option<&str>, reply: ScriptedReply) {
        self.rules.lock().unwrap().push(Rule {
            task,
            needle: needle.map(str::to_string),
            reply,
            hits: 0,
        });
    }

    /// All requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<OracleRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task: OracleTask) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Call counts per task.
    pub fn call_histogram(&self) -> BTreeMap<OracleTask, usize> {
        let mut counts = BTreeMap::new();
        for r in self.calls.lock().unwrap().iter() {
            *counts.entry(r.task).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> OracleResult<String> {
        self.calls.lock().unwrap().push(request.clone());

        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| {
            r.task == request.task
                && r
                    .needle
                    .as_deref()
                    .map_or(true, |n| request.prompt.user.contains(n))
        });

        let Some(rule) = rule else {
            return Err(OracleError::Unscripted { task: request.task });
        };

        rule.hits += 1;
        match &rule.reply {
            ScriptedReply::Text(text) => Ok(text.clone()),
            ScriptedReply::Error(err) => Err(err.clone()),
            ScriptedReply::FailThen { times, error, text } => {
                if rule.hits <= *times {
                    Err(error.clone())
                } else {
                    Ok(text.clone())
                }
            }
        }
    }
}
