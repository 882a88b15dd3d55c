//! Detection stage: accepted flow dataset to zero or more findings.
//!
//! No findings short-circuits the whole instance straight to `ACK_DONE`;
//! otherwise every finding becomes its own fan-out trigger with independent
//! downstream join state.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::adapters::Detector;
use crate::bus::{EventBus, Handler};
use crate::domain::{FlowRecord, Message, Payload, StageKind, Topic};

pub struct DetectorStage {
    bus: Arc<EventBus>,
    detector: Arc<dyn Detector>,
}

impl DetectorStage {
    pub fn new(bus: Arc<EventBus>, detector: Arc<dyn Detector>) -> Self {
        Self { bus, detector }
    }
}

#[async_trait]
impl Handler for DetectorStage {
    async fn handle(&self, msg: Message) -> Result<()> {
        let (Topic::Accepted(StageKind::Ingest), Payload::Accepted { body, .. }) =
            (msg.topic, msg.payload)
        else {
            warn!("detector stage received an unexpected message");
            return Ok(());
        };

        let records: Vec<FlowRecord> = serde_json::from_value(
            body.get("records")
                .cloned()
                .context("dataset is missing records")?,
        )
        .context("dataset records are malformed")?;

        let findings = self.detector.detect(&records).await?;

        if findings.is_empty() {
            info!(trace_id = %msg.trace_id, "no findings, signaling completion");
            self.bus.publish(Message::done(msg.trace_id))?;
            return Ok(());
        }

        info!(trace_id = %msg.trace_id, findings = findings.len(), "findings detected");
        for finding in findings {
            self.bus
                .publish(Message::plan(msg.trace_id, json!({ "finding": finding })))?;
        }
        Ok(())
    }
}
