//! Workflow coordination: start/await, fan-out/fan-in, fatal absorption.
//!
//! The sequencer owns all per-trace state. For every detected finding it
//! creates join state *before* publishing either enrichment request, so a
//! branch result can never observe a missing join. Fatal messages from any
//! branch are absorbed into a recorded reason plus an `ACK_DONE`, so the
//! caller always gets a deterministic terminal outcome instead of a hang.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Handler};
use crate::domain::{Message, Payload, StageKind, Topic};

/// Terminal outcome of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The instance ran to completion (report committed, or nothing to do)
    Completed,

    /// A branch exhausted its retry budget or failed; nothing was committed
    Fatal {
        reason: String,
        last_feedback: Option<String>,
        retry_count: u32,
    },
}

/// Partial fan-in state for one finding.
struct JoinState {
    finding: Value,
    domain: Option<Value>,
    history: Option<Value>,
}

struct Waiter {
    tx: Option<oneshot::Sender<RunOutcome>>,
    fatal: Option<RunOutcome>,
}

pub struct Sequencer {
    bus: Arc<EventBus>,
    /// Join state per (trace, finding); single point of mutation for fan-in
    joins: Mutex<HashMap<(Uuid, String), JoinState>>,
    waiters: Mutex<HashMap<Uuid, Waiter>>,
}

impl Sequencer {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            joins: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Start a workflow instance and suspend until its completion signal.
    ///
    /// No deadline is enforced here; callers wanting one should use
    /// [`crate::core::Runtime::run_with_deadline`].
    pub async fn start(&self, raw_logs: String) -> Result<RunOutcome> {
        let trace_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.lock_waiters();
            waiters.insert(
                trace_id,
                Waiter {
                    tx: Some(tx),
                    fatal: None,
                },
            );
        }

        info!(%trace_id, "starting workflow instance");
        self.bus.publish(Message::work(
            trace_id,
            StageKind::Ingest,
            json!({ "raw_logs": raw_logs }),
        ))?;

        let outcome = rx.await.context("completion waiter dropped")?;
        info!(%trace_id, completed = matches!(outcome, RunOutcome::Completed), "workflow instance finished");
        Ok(outcome)
    }

    fn lock_joins(&self) -> std::sync::MutexGuard<'_, HashMap<(Uuid, String), JoinState>> {
        self.joins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Waiter>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A finding was detected: create join state, then fan out to both
    /// enrichment branches.
    fn on_fanout_trigger(&self, msg: Message) -> Result<()> {
        let Payload::Work { body } = msg.payload else {
            anyhow::bail!("malformed payload on {}", Topic::Plan);
        };
        let finding = body
            .get("finding")
            .cloned()
            .context("fan-out trigger is missing the finding")?;
        let finding_id = finding
            .get("id")
            .and_then(Value::as_str)
            .context("finding has no id")?
            .to_string();

        // join state must exist before either branch request is published
        self.lock_joins().insert(
            (msg.trace_id, finding_id.clone()),
            JoinState {
                finding: finding.clone(),
                domain: None,
                history: None,
            },
        );

        info!(trace_id = %msg.trace_id, finding_id, "fanning out to enrichment branches");
        for kind in StageKind::BRANCHES {
            self.bus.publish(Message::work(
                msg.trace_id,
                kind,
                json!({ "finding": finding }),
            ))?;
        }
        Ok(())
    }

    /// An accepted branch result arrived: record it, and publish the report
    /// work message exactly once when both slots are populated.
    fn on_branch_result(&self, kind: StageKind, msg: Message) -> Result<()> {
        let Payload::Accepted { body, .. } = msg.payload else {
            anyhow::bail!("malformed payload on {}", Topic::Accepted(kind));
        };
        let finding_id = body
            .get("finding_id")
            .and_then(Value::as_str)
            .context("branch result has no finding_id")?
            .to_string();

        let key = (msg.trace_id, finding_id.clone());
        let mut joins = self.lock_joins();
        let Some(join) = joins.get_mut(&key) else {
            // join was discarded by fatal absorption; late result is dropped
            warn!(trace_id = %msg.trace_id, finding_id, branch = %kind, "late branch result, no join state");
            return Ok(());
        };

        match kind {
            StageKind::DomainEnrichment => join.domain = Some(body),
            StageKind::HistoryEnrichment => join.history = Some(body),
            other => anyhow::bail!("{other} is not an enrichment branch"),
        }

        if join.domain.is_some() && join.history.is_some() {
            let join = joins.remove(&key).context("join state vanished")?;
            drop(joins);

            info!(trace_id = %msg.trace_id, finding_id, "both branches ready, assembling report");
            self.bus.publish(Message::work(
                msg.trace_id,
                StageKind::Report,
                json!({
                    "finding": join.finding,
                    "domain": join.domain,
                    "history": join.history,
                }),
            ))?;
        }
        Ok(())
    }

    /// A branch went fatal: discard the trace's joins, remember the reason,
    /// and terminate the whole instance deterministically.
    fn on_fatal(&self, msg: Message) -> Result<()> {
        let Payload::Fatal {
            reason,
            last_feedback,
            retry_count,
        } = msg.payload
        else {
            anyhow::bail!("malformed payload on {}", Topic::Fatal);
        };

        warn!(trace_id = %msg.trace_id, %reason, "absorbing fatal branch, aborting instance");
        self.lock_joins().retain(|(tid, _), _| *tid != msg.trace_id);
        {
            let mut waiters = self.lock_waiters();
            if let Some(waiter) = waiters.get_mut(&msg.trace_id) {
                // first fatal wins
                if waiter.fatal.is_none() {
                    waiter.fatal = Some(RunOutcome::Fatal {
                        reason,
                        last_feedback,
                        retry_count,
                    });
                }
            }
        }

        self.bus.publish(Message::done(msg.trace_id))?;
        Ok(())
    }

    /// Completion signal observed: wake the caller with the recorded outcome.
    fn on_done(&self, trace_id: Uuid) {
        let waiter = self.lock_waiters().remove(&trace_id);
        match waiter {
            Some(mut waiter) => {
                let outcome = waiter.fatal.take().unwrap_or(RunOutcome::Completed);
                if let Some(tx) = waiter.tx.take() {
                    // caller may have dropped the future; nothing to do then
                    let _ = tx.send(outcome);
                }
            }
            None => debug!(%trace_id, "late completion signal, already terminated"),
        }
    }
}

#[async_trait]
impl Handler for Sequencer {
    async fn handle(&self, msg: Message) -> Result<()> {
        match msg.topic {
            Topic::Plan => self.on_fanout_trigger(msg),
            Topic::Accepted(kind) if StageKind::BRANCHES.contains(&kind) => {
                self.on_branch_result(kind, msg)
            }
            Topic::Fatal => self.on_fatal(msg),
            Topic::Done => {
                self.on_done(msg.trace_id);
                Ok(())
            }
            other => {
                warn!(topic = %other, "sequencer received an unexpected message");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CollectingObserver;
    use crate::domain::Payload;
    use std::time::Duration;

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

    fn branch_result(trace_id: Uuid, kind: StageKind, finding_id: &str) -> Message {
        Message {
            trace_id,
            topic: Topic::Accepted(kind),
            payload: Payload::Accepted {
                body: json!({ "finding_id": finding_id, "summary": kind.as_str() }),
                retry_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_join_fires_once_after_both_branches() {
        let bus = Arc::new(EventBus::new(Arc::new(CollectingObserver::new())));
        let probe = Arc::new(Probe {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(Topic::Work(StageKind::Report), probe.clone());

        let sequencer = Sequencer::new(bus.clone());
        let trace_id = Uuid::new_v4();

        sequencer
            .handle(Message::plan(
                trace_id,
                json!({"finding": {"id": "A-0001", "description": "x"}}),
            ))
            .await
            .unwrap();
        // history first, then domain: arrival order must not matter
        sequencer
            .handle(branch_result(trace_id, StageKind::HistoryEnrichment, "A-0001"))
            .await
            .unwrap();
        sequencer
            .handle(branch_result(trace_id, StageKind::DomainEnrichment, "A-0001"))
            .await
            .unwrap();

        let runner = bus.clone();
        tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = probe.seen.lock().unwrap();
        let joins: Vec<_> = seen
            .iter()
            .filter(|m| m.topic == Topic::Work(StageKind::Report))
            .collect();
        assert_eq!(joins.len(), 1);
        let Payload::Work { body } = &joins[0].payload else {
            panic!("expected work payload");
        };
        assert_eq!(body["finding"]["id"], "A-0001");
        assert_eq!(body["domain"]["summary"], "DomainEnrichment");
        assert_eq!(body["history"]["summary"], "HistoryEnrichment");
    }

    #[tokio::test]
    async fn test_late_branch_result_after_fatal_is_dropped() {
        let bus = Arc::new(EventBus::new(Arc::new(CollectingObserver::new())));
        let probe = Arc::new(Probe {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(Topic::Work(StageKind::Report), probe.clone());

        let sequencer = Sequencer::new(bus.clone());
        let trace_id = Uuid::new_v4();

        sequencer
            .handle(Message::plan(
                trace_id,
                json!({"finding": {"id": "A-0001", "description": "x"}}),
            ))
            .await
            .unwrap();
        sequencer
            .handle(Message::fatal(
                trace_id,
                StageKind::DomainEnrichment,
                Some("exhausted".to_string()),
                2,
            ))
            .await
            .unwrap();
        // the other branch completes afterwards
        sequencer
            .handle(branch_result(trace_id, StageKind::HistoryEnrichment, "A-0001"))
            .await
            .unwrap();
        sequencer
            .handle(branch_result(trace_id, StageKind::DomainEnrichment, "A-0001"))
            .await
            .unwrap();

        let runner = bus.clone();
        tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(probe.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_findings_join_independently() {
        let bus = Arc::new(EventBus::new(Arc::new(CollectingObserver::new())));
        let probe = Arc::new(Probe {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(Topic::Work(StageKind::Report), probe.clone());

        let sequencer = Sequencer::new(bus.clone());
        let trace_id = Uuid::new_v4();

        for id in ["A-0001", "A-0002"] {
            sequencer
                .handle(Message::plan(
                    trace_id,
                    json!({"finding": {"id": id, "description": "x"}}),
                ))
                .await
                .unwrap();
        }
        // interleaved branch completions across the two findings
        sequencer
            .handle(branch_result(trace_id, StageKind::DomainEnrichment, "A-0001"))
            .await
            .unwrap();
        sequencer
            .handle(branch_result(trace_id, StageKind::DomainEnrichment, "A-0002"))
            .await
            .unwrap();
        sequencer
            .handle(branch_result(trace_id, StageKind::HistoryEnrichment, "A-0002"))
            .await
            .unwrap();
        sequencer
            .handle(branch_result(trace_id, StageKind::HistoryEnrichment, "A-0001"))
            .await
            .unwrap();

        let runner = bus.clone();
        tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(probe.seen.lock().unwrap().len(), 2);
    }
}
