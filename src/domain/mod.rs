//! Data structures: messages, topics, flow records, findings.

pub mod finding;
pub mod flow;
pub mod message;
pub mod topic;

pub use finding::{Finding, Severity};
pub use flow::{parse_raw_logs, FlowRecord};
pub use message::{Message, Payload};
pub use topic::{StageKind, Topic};
