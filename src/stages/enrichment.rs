//! Enrichment stage, instantiated once per branch.
//!
//! The two branches (domain knowledge, incident history) run the same
//! logic against different retrievers: look up context for the finding,
//! summarize it with the generator, and submit the result to the gate. On
//! reflection the summary is regenerated with the judge feedback appended.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapters::{Generator, Retriever};
use crate::bus::{EventBus, Handler};
use crate::domain::{Message, Payload, StageKind, Topic};

pub struct EnrichmentStage {
    kind: StageKind,
    bus: Arc<EventBus>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
}

impl EnrichmentStage {
    pub fn new(
        kind: StageKind,
        bus: Arc<EventBus>,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        debug_assert!(StageKind::BRANCHES.contains(&kind));
        Self {
            kind,
            bus,
            retriever,
            generator,
        }
    }

    fn summary_prompt(&self, finding: &Value, context: &Value) -> String {
        format!(
            "You are a SOC analyst assistant. Summarize what this context \
             contributes to understanding the anomaly, in two or three \
             sentences of business English.\n\
             Branch: {}\nAnomaly: {}\nContext: {}",
            self.kind, finding, context
        )
    }

    async fn enrich(&self, msg: Message) -> Result<()> {
        let Payload::Work { body } = msg.payload else {
            anyhow::bail!("malformed payload on {}", Topic::Work(self.kind));
        };
        let finding = body
            .get("finding")
            .cloned()
            .context("enrichment request is missing the finding")?;
        let finding_id = finding
            .get("id")
            .and_then(Value::as_str)
            .context("finding has no id")?
            .to_string();
        let query = finding
            .get("description")
            .and_then(Value::as_str)
            .context("finding has no description")?;

        let context = self.retriever.retrieve(query).await?;
        let summary = self
            .generator
            .generate(&self.summary_prompt(&finding, &context))
            .await?;
        debug!(branch = %self.kind, trace_id = %msg.trace_id, finding_id, "context enriched");

        self.bus.publish(Message::validate(
            msg.trace_id,
            self.kind,
            json!({
                "branch": self.kind.as_str(),
                "finding_id": finding_id,
                "finding": finding,
                "context": context,
                "summary": summary,
            }),
            0,
        ))?;
        Ok(())
    }

    async fn reflect(&self, msg: Message) -> Result<()> {
        let Payload::Reflect {
            mut original,
            feedback,
            retry_count,
        } = msg.payload
        else {
            anyhow::bail!("malformed payload on {}", Topic::Reflect(self.kind));
        };

        let prompt = format!(
            "You are a SOC analyst assistant. Your previous context summary \
             was rejected by a reviewer. Rewrite it to address the feedback; \
             return only the revised summary.\n\
             Previous summary: {}\nContext: {}\nFeedback: {}",
            original.get("summary").and_then(Value::as_str).unwrap_or(""),
            original.get("context").cloned().unwrap_or(Value::Null),
            feedback,
        );
        let revised = self.generator.generate(&prompt).await?;
        debug!(branch = %self.kind, trace_id = %msg.trace_id, retry_count, "summary regenerated");

        original["summary"] = Value::String(revised);
        self.bus
            .publish(Message::validate(msg.trace_id, self.kind, original, retry_count))?;
        Ok(())
    }
}

#[async_trait]
impl Handler for EnrichmentStage {
    async fn handle(&self, msg: Message) -> Result<()> {
        match msg.topic {
            Topic::Work(kind) if kind == self.kind => self.enrich(msg).await,
            Topic::Reflect(kind) if kind == self.kind => self.reflect(msg).await,
            topic => {
                warn!(%topic, branch = %self.kind, "enrichment stage received an unexpected message");
                Ok(())
            }
        }
    }
}
