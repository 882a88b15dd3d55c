//! Detection findings carried through fan-out, join, and report bodies.

use serde::{Deserialize, Serialize};

use super::flow::FlowRecord;

/// Severity of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One anomaly detected in a flow dataset.
///
/// Each finding fans out to both enrichment branches independently and owns
/// its own join state downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Stable id within the process (`A-0001`, `A-0002`, ...)
    pub id: String,

    pub severity: Severity,

    /// Human-readable description of the anomaly
    pub description: String,

    /// The flow records that triggered the detection
    pub flows: Vec<FlowRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_serialization() {
        let finding = Finding {
            id: "A-0001".to_string(),
            severity: Severity::High,
            description: "Threshold of bytes per second exceeded".to_string(),
            flows: vec![],
        };

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["id"], "A-0001");
        assert_eq!(json["severity"], "high");
    }
}
