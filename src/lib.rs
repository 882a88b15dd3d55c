//! socflow - event-driven triage pipeline for network anomaly reports
//!
//! A publish/subscribe orchestration substrate with the SOC triage pipeline
//! built on top of it: ingest raw flow logs, detect anomalies, enrich each
//! finding with domain knowledge and incident history in parallel, and
//! generate a validated incident report.
//!
//! # Architecture
//!
//! The system is built around an in-process event bus:
//! - Stages communicate only through immutable messages keyed by topic
//! - Every stage's output passes a uniform validation gate that can send it
//!   back for bounded self-correction before escalating to a fatal failure
//! - The sequencer owns all per-trace state: the fan-out/fan-in join over
//!   the two enrichment branches and the completion signal the caller
//!   awaits
//!
//! # Modules
//!
//! - `bus`: topic router and dispatch loop
//! - `domain`: messages, topics, flow records, findings
//! - `core`: validator, sequencer, runtime assembly
//! - `stages`: the pipeline stage handlers
//! - `adapters`: collaborator seams (judge, generator, retrievers,
//!   detector, sink, observer) and their backends
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline over a capture file
//! socflow run --input flows.log
//!
//! # Show recently committed reports
//! socflow history
//!
//! # Check collaborator health
//! socflow doctor
//! ```

pub mod adapters;
pub mod bus;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use bus::{BusError, EventBus, Handler};
pub use config::PipelineConfig;
pub use crate::core::{Collaborators, RunError, RunOutcome, Runtime};
pub use domain::{Finding, FlowRecord, Message, Payload, Severity, StageKind, Topic};
