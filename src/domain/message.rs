//! The immutable unit of communication between stages.
//!
//! A message is an envelope: a trace id that never changes within a workflow
//! instance, the routing topic, and a tagged payload. Protocol fields
//! (retry count, feedback, fatal reason) are typed on the payload variants;
//! the stage-specific body stays an open JSON mapping whose semantics are
//! sender/receiver convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::topic::{StageKind, Topic};

/// A single message on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id, assigned once per workflow instance
    pub trace_id: Uuid,

    /// Routing topic
    pub topic: Topic,

    /// Tagged payload
    pub payload: Payload,
}

/// Payload variants, one per protocol phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// A work request carrying an open body
    Work { body: Value },

    /// Stage output pending validation
    Validate { body: Value, retry_count: u32 },

    /// Rejected output routed back to its stage with judge feedback
    Reflect {
        original: Value,
        feedback: String,
        retry_count: u32,
    },

    /// Output accepted by the gate (body and retry count carried unmodified)
    Accepted { body: Value, retry_count: u32 },

    /// Terminal failure for one branch of a trace
    Fatal {
        reason: String,
        last_feedback: Option<String>,
        retry_count: u32,
    },

    /// Whole-instance completion signal
    Done,
}

impl Payload {
    /// Retry count carried by this payload (zero where the phase has none)
    pub fn retry_count(&self) -> u32 {
        match self {
            Self::Work { .. } | Self::Done => 0,
            Self::Validate { retry_count, .. }
            | Self::Reflect { retry_count, .. }
            | Self::Accepted { retry_count, .. }
            | Self::Fatal { retry_count, .. } => *retry_count,
        }
    }
}

impl Message {
    /// Work request for a stage
    pub fn work(trace_id: Uuid, kind: StageKind, body: Value) -> Self {
        Self {
            trace_id,
            topic: Topic::Work(kind),
            payload: Payload::Work { body },
        }
    }

    /// Fan-out trigger carrying a detected finding
    pub fn plan(trace_id: Uuid, body: Value) -> Self {
        Self {
            trace_id,
            topic: Topic::Plan,
            payload: Payload::Work { body },
        }
    }

    /// Stage output submitted to the validation gate
    pub fn validate(trace_id: Uuid, kind: StageKind, body: Value, retry_count: u32) -> Self {
        Self {
            trace_id,
            topic: Topic::Validate(kind),
            payload: Payload::Validate { body, retry_count },
        }
    }

    /// Terminal failure for a stage family
    pub fn fatal(
        trace_id: Uuid,
        reason: StageKind,
        last_feedback: Option<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            trace_id,
            topic: Topic::Fatal,
            payload: Payload::Fatal {
                reason: reason.as_str().to_string(),
                last_feedback,
                retry_count,
            },
        }
    }

    /// Completion signal for a trace
    pub fn done(trace_id: Uuid) -> Self {
        Self {
            trace_id,
            topic: Topic::Done,
            payload: Payload::Done,
        }
    }

    /// Short human-readable summary for logs and observer output (no body
    /// content, which may be large or sensitive)
    pub fn summary(&self) -> String {
        match &self.payload {
            Payload::Work { .. } => "work request".to_string(),
            Payload::Validate { retry_count, .. } => {
                format!("pending validation (retry_count={retry_count})")
            }
            Payload::Reflect {
                feedback,
                retry_count,
                ..
            } => format!("rejected: {feedback} (retry_count={retry_count})"),
            Payload::Accepted { retry_count, .. } => {
                format!("accepted (retry_count={retry_count})")
            }
            Payload::Fatal {
                reason,
                retry_count,
                ..
            } => format!("fatal: {reason} (retry_count={retry_count})"),
            Payload::Done => "done".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_round_trip() {
        let msg = Message::validate(
            Uuid::new_v4(),
            StageKind::Report,
            json!({"report": "text"}),
            1,
        );
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.trace_id, msg.trace_id);
        assert_eq!(parsed.topic, Topic::Validate(StageKind::Report));
        assert_eq!(parsed.payload.retry_count(), 1);
    }

    #[test]
    fn test_retry_count_defaults_to_zero() {
        let msg = Message::work(Uuid::new_v4(), StageKind::Ingest, json!({}));
        assert_eq!(msg.payload.retry_count(), 0);
        assert_eq!(Message::done(Uuid::new_v4()).payload.retry_count(), 0);
    }

    #[test]
    fn test_summary_carries_protocol_fields_only() {
        let msg = Message {
            trace_id: Uuid::new_v4(),
            topic: Topic::Reflect(StageKind::Report),
            payload: Payload::Reflect {
                original: json!({"report": "secret content"}),
                feedback: "missing detail".to_string(),
                retry_count: 1,
            },
        };

        let summary = msg.summary();
        assert!(summary.contains("missing detail"));
        assert!(summary.contains("retry_count=1"));
        assert!(!summary.contains("secret content"));
    }
}
