//! Ingest stage: raw log blob to flow dataset.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::bus::{EventBus, Handler};
use crate::domain::{parse_raw_logs, Message, Payload, StageKind, Topic};

pub struct IngestStage {
    bus: Arc<EventBus>,
}

impl IngestStage {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Handler for IngestStage {
    async fn handle(&self, msg: Message) -> Result<()> {
        match (msg.topic, msg.payload) {
            (Topic::Work(StageKind::Ingest), Payload::Work { body }) => {
                let raw = body
                    .get("raw_logs")
                    .and_then(|v| v.as_str())
                    .context("ingest request is missing raw_logs")?;

                let records = parse_raw_logs(raw)?;
                info!(trace_id = %msg.trace_id, records = records.len(), "raw logs parsed");

                self.bus.publish(Message::validate(
                    msg.trace_id,
                    StageKind::Ingest,
                    json!({
                        "record_count": records.len(),
                        "records": records,
                    }),
                    0,
                ))?;
            }
            // parsing is deterministic, so reflection re-submits the
            // original dataset with the carried retry count
            (
                Topic::Reflect(StageKind::Ingest),
                Payload::Reflect {
                    original,
                    retry_count,
                    ..
                },
            ) => {
                self.bus.publish(Message::validate(
                    msg.trace_id,
                    StageKind::Ingest,
                    original,
                    retry_count,
                ))?;
            }
            (topic, _) => warn!(%topic, "ingest stage received an unexpected message"),
        }
        Ok(())
    }
}
