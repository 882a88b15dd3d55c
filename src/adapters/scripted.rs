//! Deterministic collaborator backends.
//!
//! These serve two purposes: the offline fallback when no LLM backend is
//! reachable, and scriptable doubles for the protocol tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Finding, FlowRecord};

use super::{Detector, Generator, Judge, Retriever, Sink, Verdict};

/// Generator that replays canned responses, then repeats a default.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    default: String,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            default: "VALID".to_string(),
            delay: None,
        }
    }

    /// Response returned once the scripted queue is exhausted
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    /// Artificial latency per call (deadline tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Offline fallback backend: accepts everything and produces a stub
    /// report, mirroring a canned-response LLM.
    pub fn fallback() -> Self {
        Self::new(Vec::new()).with_default(
            "VALID\nStub incident report: see attached finding context; review manually.",
        )
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _context: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.default.clone());
        Ok(next)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

struct RejectRule {
    pattern: String,
    remaining: u32,
    feedback: String,
}

/// Judge scripted by content pattern: rejects the first N contents matching
/// a substring, accepts everything else. Pattern matching keeps verdicts
/// deterministic even when validations from different branches race.
#[derive(Default)]
pub struct ScriptedJudge {
    rules: Mutex<Vec<RejectRule>>,
}

impl ScriptedJudge {
    /// Judge that accepts every content
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Reject the next `times` contents containing `pattern`, with the given
    /// feedback
    pub fn reject_matching(
        self,
        pattern: impl Into<String>,
        times: u32,
        feedback: impl Into<String>,
    ) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(RejectRule {
                pattern: pattern.into(),
                remaining: times,
                feedback: feedback.into(),
            });
        }
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, content: &str) -> Result<Verdict> {
        let mut rules = self
            .rules
            .lock()
            .map_err(|_| anyhow::anyhow!("judge lock poisoned"))?;
        for rule in rules.iter_mut() {
            if rule.remaining > 0 && content.contains(&rule.pattern) {
                rule.remaining -= 1;
                return Ok(Verdict::reject(rule.feedback.clone()));
            }
        }
        Ok(Verdict::accept())
    }
}

/// Retriever returning a fixed context for every query.
pub struct StaticRetriever {
    context: Value,
}

impl StaticRetriever {
    pub fn new(context: Value) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Value> {
        Ok(self.context.clone())
    }
}

/// Retriever that always fails; exercises the supervised-stage path.
pub struct FailingRetriever {
    message: String,
}

impl FailingRetriever {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Retriever for FailingRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Value> {
        anyhow::bail!("{}", self.message)
    }
}

/// Detector returning a fixed finding list regardless of the dataset.
pub struct FixedDetector {
    findings: Vec<Finding>,
}

impl FixedDetector {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }
}

#[async_trait]
impl Detector for FixedDetector {
    async fn detect(&self, _records: &[FlowRecord]) -> Result<Vec<Finding>> {
        Ok(self.findings.clone())
    }
}

/// In-memory sink recording every committed report.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(Uuid, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Uuid, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn append(&self, trace_id: Uuid, content: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("sink lock poisoned"))?
            .push((trace_id, content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_generator_replays_then_defaults() {
        let generator = ScriptedGenerator::new(vec!["first".to_string()]).with_default("rest");
        assert_eq!(generator.generate("x").await.unwrap(), "first");
        assert_eq!(generator.generate("x").await.unwrap(), "rest");
        assert_eq!(generator.generate("x").await.unwrap(), "rest");
    }

    #[tokio::test]
    async fn test_scripted_judge_rejects_bounded_times() {
        let judge = ScriptedJudge::accept_all().reject_matching("report", 2, "too vague");

        assert!(!judge.judge("a report body").await.unwrap().valid);
        assert!(!judge.judge("a report body").await.unwrap().valid);
        assert!(judge.judge("a report body").await.unwrap().valid);
        assert!(judge.judge("unrelated").await.unwrap().valid);
    }
}
