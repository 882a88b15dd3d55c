//! Typed topics for the pipeline protocol.
//!
//! Every producing stage owns a topic family: a work topic, a `_VALIDATE`
//! topic for results pending the gate, an `_OK` topic for accepted results,
//! and a `_VALIDATE_REFLECT` topic for rejected results routed back with
//! feedback. The family transitions live here instead of being derived by
//! string suffix surgery.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stages that produce gated output and therefore own a topic family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Raw-log parsing into a flow dataset
    Ingest,

    /// Enrichment branch A: domain knowledge lookup
    DomainEnrichment,

    /// Enrichment branch B: historical incident lookup
    HistoryEnrichment,

    /// Final incident report generation
    Report,
}

impl StageKind {
    /// Wire-style family name, used in logs, observer output and fatal reasons
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "Ingest",
            Self::DomainEnrichment => "DomainEnrichment",
            Self::HistoryEnrichment => "HistoryEnrichment",
            Self::Report => "Report",
        }
    }

    /// The two parallel enrichment branches joined by the sequencer
    pub const BRANCHES: [StageKind; 2] = [Self::DomainEnrichment, Self::HistoryEnrichment];

    /// All stages whose output passes through the validation gate
    pub const GATED: [StageKind; 4] = [
        Self::Ingest,
        Self::DomainEnrichment,
        Self::HistoryEnrichment,
        Self::Report,
    ];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing topic on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Work request for a stage
    Work(StageKind),

    /// Stage output pending validation
    Validate(StageKind),

    /// Stage output accepted by the gate
    Accepted(StageKind),

    /// Stage output rejected; feedback attached, routed back to the stage
    Reflect(StageKind),

    /// A detected finding ready for enrichment fan-out
    Plan,

    /// Terminal failure for one branch of a trace
    Fatal,

    /// Whole-instance completion signal
    Done,
}

impl Topic {
    /// The family this topic belongs to, if any
    pub fn family(&self) -> Option<StageKind> {
        match self {
            Self::Work(k) | Self::Validate(k) | Self::Accepted(k) | Self::Reflect(k) => Some(*k),
            Self::Plan | Self::Fatal | Self::Done => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work(k) => write!(f, "{}", k.as_str()),
            Self::Validate(k) => write!(f, "{}_VALIDATE", k.as_str()),
            Self::Accepted(k) => write!(f, "{}_OK", k.as_str()),
            Self::Reflect(k) => write!(f, "{}_VALIDATE_REFLECT", k.as_str()),
            Self::Plan => f.write_str("PLAN"),
            Self::Fatal => f.write_str("FATAL"),
            Self::Done => f.write_str("ACK_DONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            Topic::Validate(StageKind::DomainEnrichment).to_string(),
            "DomainEnrichment_VALIDATE"
        );
        assert_eq!(
            Topic::Reflect(StageKind::Report).to_string(),
            "Report_VALIDATE_REFLECT"
        );
        assert_eq!(Topic::Accepted(StageKind::Ingest).to_string(), "Ingest_OK");
        assert_eq!(Topic::Fatal.to_string(), "FATAL");
        assert_eq!(Topic::Done.to_string(), "ACK_DONE");
    }

    #[test]
    fn test_family() {
        assert_eq!(
            Topic::Validate(StageKind::Report).family(),
            Some(StageKind::Report)
        );
        assert_eq!(Topic::Done.family(), None);
    }

    #[test]
    fn test_topic_serialization() {
        let topic = Topic::Reflect(StageKind::HistoryEnrichment);
        let json = serde_json::to_string(&topic).unwrap();
        let parsed: Topic = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, topic);
    }
}
