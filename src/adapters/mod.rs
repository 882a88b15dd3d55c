//! Collaborator interfaces for the pipeline stages.
//!
//! The orchestration core only sees these trait seams; everything behind
//! them (LLM prompting, knowledge lookup, report persistence) is business
//! logic that can be swapped without touching the protocol.

pub mod detect;
pub mod observer;
pub mod ollama;
pub mod retrieval;
pub mod scripted;
pub mod sink;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Finding, FlowRecord};

pub use detect::ThresholdDetector;
pub use observer::{CollectingObserver, TracingObserver};
pub use ollama::{generator_for, LlmJudge, OllamaGenerator};
pub use retrieval::{HistoryRetriever, KnowledgeRule, RuleRetriever};
pub use scripted::{
    FailingRetriever, FixedDetector, MemorySink, ScriptedGenerator, ScriptedJudge,
    StaticRetriever,
};
pub use sink::{CommittedReport, JsonlSink};

/// Outcome of judging a stage's output.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub valid: bool,

    /// Corrective feedback, present on rejection
    pub feedback: Option<String>,
}

impl Verdict {
    pub fn accept() -> Self {
        Self {
            valid: true,
            feedback: None,
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            valid: false,
            feedback: Some(feedback.into()),
        }
    }
}

/// Accepts or rejects a stage's output; used exclusively by the validator.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, content: &str) -> Result<Verdict>;
}

/// Produces content from a context prompt; used by the reporter and the
/// enrichment stages (and again on reflection with feedback appended).
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    async fn generate(&self, context: &str) -> Result<String>;

    /// Backend reachability check
    async fn health_check(&self) -> Result<()>;
}

/// Looks up structured context for a query; used by the enrichment stages.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Value>;
}

/// Finds anomalies in a flow dataset (possibly none).
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, records: &[FlowRecord]) -> Result<Vec<Finding>>;
}

/// Durable commit of an accepted report; called only on the terminal
/// acceptance of the reporter's output.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn append(&self, trace_id: Uuid, content: &str) -> Result<()>;
}

/// Best-effort activity notification. Infallible by signature; an
/// implementation must swallow its own errors so a broken dashboard can
/// never affect pipeline outcome.
pub trait Observer: Send + Sync {
    fn notify(&self, topic: &str, text: &str);
}
