//! Pipeline stage handlers.
//!
//! Each stage consumes its work topic (and, for gated stages, its
//! `_VALIDATE_REFLECT` topic), delegates the actual work to a collaborator,
//! and publishes exactly one follow-up message. Stages are subscribed
//! through [`Supervised`], which turns a collaborator failure into a `FATAL`
//! message for the stage's family so a broken collaborator aborts the trace
//! instead of stalling it.

pub mod detector;
pub mod enrichment;
pub mod ingest;
pub mod reporter;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::error;

use crate::bus::{EventBus, Handler};
use crate::domain::{Message, StageKind};

pub use detector::DetectorStage;
pub use enrichment::EnrichmentStage;
pub use ingest::IngestStage;
pub use reporter::ReporterStage;

/// Wraps a stage handler so an error surfaces as a fatal branch failure.
pub struct Supervised<S> {
    inner: S,
    family: StageKind,
    bus: Arc<EventBus>,
}

impl<S> Supervised<S> {
    pub fn new(inner: S, family: StageKind, bus: Arc<EventBus>) -> Self {
        Self { inner, family, bus }
    }
}

#[async_trait]
impl<S: Handler> Handler for Supervised<S> {
    async fn handle(&self, msg: Message) -> Result<()> {
        let trace_id = msg.trace_id;
        let retry_count = msg.payload.retry_count();

        if let Err(e) = self.inner.handle(msg).await {
            error!(
                family = %self.family,
                %trace_id,
                error = %e,
                "stage failed, escalating to fatal"
            );
            self.bus.publish(Message::fatal(
                trace_id,
                self.family,
                Some(e.to_string()),
                retry_count,
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CollectingObserver;
    use crate::domain::{Payload, Topic};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct Broken;

    #[async_trait]
    impl Handler for Broken {
        async fn handle(&self, _msg: Message) -> Result<()> {
            anyhow::bail!("knowledge base offline")
        }
    }

    struct Probe {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Handler for Probe {
        async fn handle(&self, msg: Message) -> Result<()> {
            self.seen.lock().unwrap().push(msg);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stage_error_becomes_fatal_for_its_family() {
        let bus = Arc::new(EventBus::new(Arc::new(CollectingObserver::new())));
        let probe = Arc::new(Probe {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(Topic::Fatal, probe.clone());

        let supervised = Supervised::new(Broken, StageKind::DomainEnrichment, bus.clone());
        let trace_id = Uuid::new_v4();
        supervised
            .handle(Message::work(
                trace_id,
                StageKind::DomainEnrichment,
                json!({}),
            ))
            .await
            .unwrap();

        let runner = bus.clone();
        tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = probe.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let Payload::Fatal {
            reason,
            last_feedback,
            ..
        } = &seen[0].payload
        else {
            panic!("expected fatal payload");
        };
        assert_eq!(reason, "DomainEnrichment");
        assert!(last_feedback.as_deref().unwrap().contains("knowledge base offline"));
    }
}
