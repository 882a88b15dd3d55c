//! The validation gate.
//!
//! One validator instance is subscribed to every stage family's `_VALIDATE`
//! topic. For each pending output it obtains a judge verdict and publishes
//! exactly one follow-up: acceptance, a bounded reflect loop back to the
//! producing stage, or a fatal escalation once the retry budget is spent.
//! Within a family the reflect cycle is therefore strictly bounded by
//! `max_retries + 1` validation attempts, and at most one of `_OK` / `FATAL`
//! ever terminates the family for a trace.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::adapters::Judge;
use crate::bus::{EventBus, Handler};
use crate::domain::{Message, Payload, Topic};

pub struct Validator {
    bus: Arc<EventBus>,
    judge: Arc<dyn Judge>,
    max_retries: u32,
}

impl Validator {
    pub fn new(bus: Arc<EventBus>, judge: Arc<dyn Judge>, max_retries: u32) -> Self {
        Self {
            bus,
            judge,
            max_retries,
        }
    }
}

#[async_trait]
impl Handler for Validator {
    async fn handle(&self, msg: Message) -> Result<()> {
        let Topic::Validate(kind) = msg.topic else {
            warn!(topic = %msg.topic, "validator received a non-validate message");
            return Ok(());
        };
        let Payload::Validate { body, retry_count } = msg.payload else {
            anyhow::bail!("malformed payload on {}", msg.topic);
        };

        let verdict = self.judge.judge(&body.to_string()).await?;

        if verdict.valid {
            info!(family = %kind, trace_id = %msg.trace_id, retry_count, "output accepted");
            self.bus.publish(Message {
                trace_id: msg.trace_id,
                topic: Topic::Accepted(kind),
                payload: Payload::Accepted { body, retry_count },
            })?;
            return Ok(());
        }

        let feedback = verdict
            .feedback
            .unwrap_or_else(|| "rejected without feedback".to_string());

        if retry_count < self.max_retries {
            warn!(
                family = %kind,
                trace_id = %msg.trace_id,
                retry_count,
                %feedback,
                "output rejected, routing back for reflection"
            );
            self.bus.publish(Message {
                trace_id: msg.trace_id,
                topic: Topic::Reflect(kind),
                payload: Payload::Reflect {
                    original: body,
                    feedback,
                    retry_count: retry_count + 1,
                },
            })?;
        } else {
            error!(
                family = %kind,
                trace_id = %msg.trace_id,
                retry_count,
                %feedback,
                "retry budget exhausted, escalating to fatal"
            );
            self.bus.publish(Message {
                trace_id: msg.trace_id,
                topic: Topic::Fatal,
                payload: Payload::Fatal {
                    reason: kind.as_str().to_string(),
                    last_feedback: Some(feedback),
                    retry_count,
                },
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CollectingObserver, ScriptedJudge};
    use crate::domain::StageKind;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

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

    async fn gate(judge: ScriptedJudge, msg: Message) -> Vec<Message> {
        let bus = Arc::new(EventBus::new(Arc::new(CollectingObserver::new())));
        let probe = Arc::new(Probe {
            seen: Mutex::new(Vec::new()),
        });
        for kind in StageKind::GATED {
            bus.subscribe(Topic::Accepted(kind), probe.clone());
            bus.subscribe(Topic::Reflect(kind), probe.clone());
        }
        bus.subscribe(Topic::Fatal, probe.clone());

        let validator = Validator::new(bus.clone(), Arc::new(judge), 2);
        validator.handle(msg).await.unwrap();

        let runner = bus.clone();
        tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = probe.seen.lock().unwrap();
        seen.clone()
    }

    #[tokio::test]
    async fn test_acceptance_preserves_body_and_retry_count() {
        let msg = Message::validate(
            Uuid::new_v4(),
            StageKind::Report,
            json!({"report": "fine"}),
            1,
        );
        let out = gate(ScriptedJudge::accept_all(), msg).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, Topic::Accepted(StageKind::Report));
        let Payload::Accepted { body, retry_count } = &out[0].payload else {
            panic!("expected accepted payload");
        };
        assert_eq!(body["report"], "fine");
        assert_eq!(*retry_count, 1);
    }

    #[tokio::test]
    async fn test_rejection_reflects_with_incremented_retry_count() {
        let msg = Message::validate(
            Uuid::new_v4(),
            StageKind::Report,
            json!({"report": "thin"}),
            0,
        );
        let judge = ScriptedJudge::accept_all().reject_matching("thin", 1, "missing detail");
        let out = gate(judge, msg).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, Topic::Reflect(StageKind::Report));
        let Payload::Reflect {
            original,
            feedback,
            retry_count,
        } = &out[0].payload
        else {
            panic!("expected reflect payload");
        };
        assert_eq!(original["report"], "thin");
        assert_eq!(feedback, "missing detail");
        assert_eq!(*retry_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_goes_fatal() {
        let msg = Message::validate(
            Uuid::new_v4(),
            StageKind::HistoryEnrichment,
            json!({"summary": "thin"}),
            2,
        );
        let judge = ScriptedJudge::accept_all().reject_matching("thin", 1, "still wrong");
        let out = gate(judge, msg).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].topic, Topic::Fatal);
        let Payload::Fatal {
            reason,
            last_feedback,
            retry_count,
        } = &out[0].payload
        else {
            panic!("expected fatal payload");
        };
        assert_eq!(reason, "HistoryEnrichment");
        assert_eq!(last_feedback.as_deref(), Some("still wrong"));
        assert_eq!(*retry_count, 2);
    }
}
