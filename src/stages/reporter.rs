//! Reporter stage: joined enrichment results to a committed incident report.
//!
//! Consumes the assembled work message, generates the report, and submits
//! it to the gate. Once the report family reaches terminal acceptance the
//! report is committed through the sink and the completion signal goes out;
//! no partial report is ever committed.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::adapters::{Generator, Sink};
use crate::bus::{EventBus, Handler};
use crate::domain::{Message, Payload, StageKind, Topic};

pub struct ReporterStage {
    bus: Arc<EventBus>,
    generator: Arc<dyn Generator>,
    sink: Arc<dyn Sink>,
}

impl ReporterStage {
    pub fn new(bus: Arc<EventBus>, generator: Arc<dyn Generator>, sink: Arc<dyn Sink>) -> Self {
        Self {
            bus,
            generator,
            sink,
        }
    }

    async fn assemble(&self, msg: Message) -> Result<()> {
        let Payload::Work { body } = msg.payload else {
            anyhow::bail!("malformed payload on {}", Topic::Work(StageKind::Report));
        };
        let finding = body.get("finding").context("join is missing the finding")?;
        let finding_id = finding
            .get("id")
            .and_then(Value::as_str)
            .context("finding has no id")?;

        let prompt = format!(
            "You are a SOC analyst assistant. Given:\n\
             - Anomaly data: {}\n\
             - Domain knowledge: {}\n\
             - Historical incidents: {}\n\
             Write a thorough incident report including severity assessment, \
             root cause hypothesis and recommended mitigations, in concise \
             business English.",
            finding,
            body.get("domain").cloned().unwrap_or(Value::Null),
            body.get("history").cloned().unwrap_or(Value::Null),
        );
        let report = self.generator.generate(&prompt).await?;

        self.bus.publish(Message::validate(
            msg.trace_id,
            StageKind::Report,
            json!({ "finding_id": finding_id, "report": report }),
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
            anyhow::bail!("malformed payload on {}", Topic::Reflect(StageKind::Report));
        };

        let prompt = format!(
            "You are a SOC analyst assistant. You only write reports; do not \
             add content that was not requested.\n\
             Original report: {}\n\
             Revise the report to address this reviewer feedback and return \
             only the revised report:\n{}",
            original.get("report").and_then(Value::as_str).unwrap_or(""),
            feedback,
        );
        let revised = self.generator.generate(&prompt).await?;
        info!(trace_id = %msg.trace_id, retry_count, "report regenerated from feedback");

        original["report"] = Value::String(revised);
        self.bus.publish(Message::validate(
            msg.trace_id,
            StageKind::Report,
            original,
            retry_count,
        ))?;
        Ok(())
    }

    async fn commit(&self, msg: Message) -> Result<()> {
        let Payload::Accepted { body, .. } = msg.payload else {
            anyhow::bail!("malformed payload on {}", Topic::Accepted(StageKind::Report));
        };
        let report = body
            .get("report")
            .and_then(Value::as_str)
            .context("accepted report body has no report")?;

        self.sink.append(msg.trace_id, report).await?;
        info!(trace_id = %msg.trace_id, "report committed");

        self.bus.publish(Message::done(msg.trace_id))?;
        Ok(())
    }
}

#[async_trait]
impl Handler for ReporterStage {
    async fn handle(&self, msg: Message) -> Result<()> {
        match msg.topic {
            Topic::Work(StageKind::Report) => self.assemble(msg).await,
            Topic::Reflect(StageKind::Report) => self.reflect(msg).await,
            Topic::Accepted(StageKind::Report) => self.commit(msg).await,
            topic => {
                warn!(%topic, "reporter stage received an unexpected message");
                Ok(())
            }
        }
    }
}
