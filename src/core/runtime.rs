//! Pipeline assembly and the public run API.
//!
//! `Runtime::assemble` is the single setup routine: it constructs the bus,
//! validator, sequencer and stages, wires every subscription explicitly,
//! and spawns the dispatch loop. No process-wide state exists; drop the
//! runtime and everything stops.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapters::{Detector, Generator, Judge, Observer, Retriever, Sink};
use crate::bus::EventBus;
use crate::config::PipelineConfig;
use crate::domain::{StageKind, Topic};
use crate::stages::{DetectorStage, EnrichmentStage, IngestStage, ReporterStage, Supervised};

use super::sequencer::{RunOutcome, Sequencer};
use super::validator::Validator;

/// Everything the pipeline delegates to, injected at assembly time.
pub struct Collaborators {
    pub judge: Arc<dyn Judge>,
    pub generator: Arc<dyn Generator>,
    pub domain_retriever: Arc<dyn Retriever>,
    pub history_retriever: Arc<dyn Retriever>,
    pub detector: Arc<dyn Detector>,
    pub sink: Arc<dyn Sink>,
    pub observer: Arc<dyn Observer>,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("workflow did not complete within {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An assembled, running pipeline.
pub struct Runtime {
    sequencer: Arc<Sequencer>,
    dispatch: JoinHandle<()>,
}

impl Runtime {
    /// Construct and wire the whole pipeline, then start dispatching.
    pub fn assemble(config: &PipelineConfig, collaborators: Collaborators) -> Self {
        let bus = Arc::new(EventBus::new(collaborators.observer));
        let sequencer = Arc::new(Sequencer::new(bus.clone()));
        let validator = Arc::new(Validator::new(
            bus.clone(),
            collaborators.judge,
            config.max_retries,
        ));

        let ingest = Arc::new(Supervised::new(
            IngestStage::new(bus.clone()),
            StageKind::Ingest,
            bus.clone(),
        ));
        let detector = Arc::new(Supervised::new(
            DetectorStage::new(bus.clone(), collaborators.detector),
            StageKind::Ingest,
            bus.clone(),
        ));
        let domain_enrichment = Arc::new(Supervised::new(
            EnrichmentStage::new(
                StageKind::DomainEnrichment,
                bus.clone(),
                collaborators.domain_retriever,
                collaborators.generator.clone(),
            ),
            StageKind::DomainEnrichment,
            bus.clone(),
        ));
        let history_enrichment = Arc::new(Supervised::new(
            EnrichmentStage::new(
                StageKind::HistoryEnrichment,
                bus.clone(),
                collaborators.history_retriever,
                collaborators.generator.clone(),
            ),
            StageKind::HistoryEnrichment,
            bus.clone(),
        ));
        let reporter = Arc::new(Supervised::new(
            ReporterStage::new(bus.clone(), collaborators.generator, collaborators.sink),
            StageKind::Report,
            bus.clone(),
        ));

        // the full subscription table, in pipeline order
        bus.subscribe(Topic::Work(StageKind::Ingest), ingest.clone());
        bus.subscribe(Topic::Reflect(StageKind::Ingest), ingest);
        for kind in StageKind::GATED {
            bus.subscribe(Topic::Validate(kind), validator.clone());
        }
        bus.subscribe(Topic::Accepted(StageKind::Ingest), detector);
        bus.subscribe(Topic::Plan, sequencer.clone());
        bus.subscribe(
            Topic::Work(StageKind::DomainEnrichment),
            domain_enrichment.clone(),
        );
        bus.subscribe(Topic::Reflect(StageKind::DomainEnrichment), domain_enrichment);
        bus.subscribe(
            Topic::Work(StageKind::HistoryEnrichment),
            history_enrichment.clone(),
        );
        bus.subscribe(
            Topic::Reflect(StageKind::HistoryEnrichment),
            history_enrichment,
        );
        for kind in StageKind::BRANCHES {
            bus.subscribe(Topic::Accepted(kind), sequencer.clone());
        }
        bus.subscribe(Topic::Work(StageKind::Report), reporter.clone());
        bus.subscribe(Topic::Reflect(StageKind::Report), reporter.clone());
        bus.subscribe(Topic::Accepted(StageKind::Report), reporter);
        bus.subscribe(Topic::Fatal, sequencer.clone());
        bus.subscribe(Topic::Done, sequencer.clone());

        let dispatch = tokio::spawn(async move {
            // returns only on double-start, which assemble rules out
            let _ = bus.run().await;
        });
        debug!("pipeline assembled, dispatch loop running");

        Self {
            sequencer,
            dispatch,
        }
    }

    /// Run one workflow instance to its terminal outcome. Suspends until
    /// the instance's completion signal; a dropped message upstream would
    /// hang this forever, so prefer [`Self::run_with_deadline`].
    pub async fn run(&self, raw_logs: String) -> Result<RunOutcome, RunError> {
        Ok(self.sequencer.start(raw_logs).await?)
    }

    /// Run one workflow instance with an explicit deadline.
    pub async fn run_with_deadline(
        &self,
        raw_logs: String,
        deadline: Duration,
    ) -> Result<RunOutcome, RunError> {
        tokio::time::timeout(deadline, self.run(raw_logs))
            .await
            .map_err(|_| RunError::DeadlineExceeded(deadline))?
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}
