//! Pipeline orchestration.
//!
//! Runs scrape → load → transform → enrich strictly in order. Each stage goes
//! through the [`StageRunner`]; a terminal failure moves the run to
//! [`PipelineState::Failed`] and no later stage executes. Every call to
//! [`Pipeline::run`] starts a fresh run from `not_started`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::classifier::DetectionClassifier;
use crate::config::AppConfig;
use crate::db::Database;
use crate::detector::Detector;
use crate::enrich::{EnrichAction, Enricher};
use crate::ingest::LoadAction;
use crate::models::{PipelineRun, PipelineState, StageName, StageStatus, StageToken};
use crate::stage::{CommandAction, StageAction, StageRunner};

/// The action behind each stage
#[derive(Clone)]
pub struct PipelineStages {
    pub scrape: Arc<dyn StageAction>,
    pub load: Arc<dyn StageAction>,
    pub transform: Arc<dyn StageAction>,
    pub enrich: Arc<dyn StageAction>,
}

impl PipelineStages {
    fn action(&self, stage: StageName) -> &dyn StageAction {
        match stage {
            StageName::Scrape => self.scrape.as_ref(),
            StageName::Load => self.load.as_ref(),
            StageName::Transform => self.transform.as_ref(),
            StageName::Enrich => self.enrich.as_ref(),
        }
    }

    /// Wire the production stages from configuration
    ///
    /// Scrape and transform are external commands; load and enrich run in-process
    /// against the shared database handle.
    pub fn from_config(config: &AppConfig, db: &Database, detector: Arc<dyn Detector>) -> Result<Self> {
        let scrape = CommandAction::from_command_line(StageName::Scrape, &config.pipeline.scrape_command)
            .ok_or_else(|| anyhow!("scrape_command is empty"))?;
        let transform = CommandAction::from_command_line(StageName::Transform, &config.pipeline.transform_command)
            .ok_or_else(|| anyhow!("transform_command is empty"))?;

        let load = LoadAction::new(Arc::new(db.clone()), config.data_root(), config.ingest.manifest_suffix.clone());

        let classifier = DetectionClassifier::new(
            config.enrich.subject_classes.iter().cloned(),
            config.enrich.product_classes.iter().cloned(),
        );
        let mut enricher = Enricher::new(Arc::new(db.clone()), detector, classifier, &config.enrich.image_root);
        if let Some(csv) = &config.enrich.output_csv {
            enricher = enricher.with_output_csv(PathBuf::from(csv));
        }

        Ok(Self {
            scrape: Arc::new(scrape),
            load: Arc::new(load),
            transform: Arc::new(transform),
            enrich: Arc::new(EnrichAction::new(enricher)),
        })
    }
}

/// Request to stop a run at the next stage boundary
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sequential four-stage orchestrator
pub struct Pipeline {
    runner: StageRunner,
    stages: PipelineStages,
    abort: AbortHandle,
}

impl Pipeline {
    pub fn new(runner: StageRunner, stages: PipelineStages) -> Self {
        Self {
            runner,
            stages,
            abort: AbortHandle::default(),
        }
    }

    /// Handle that stops the current run before its next stage
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Execute one complete run
    ///
    /// An abort requested before the run starts stops it before scrape. The
    /// request is cleared once the run settles.
    pub async fn run(&self) -> PipelineRun {
        let mut run = PipelineRun::new();
        let mut token = StageToken::start();
        info!(started_at = %run.started_at, "Pipeline run started");

        for (index, stage) in StageName::ORDER.into_iter().enumerate() {
            if self.abort.is_aborted() {
                warn!(stage = %stage, "Run aborted at stage boundary");
                run.stages[index].last_error = Some(format!("run aborted before {stage}"));
                transition(&mut run, PipelineState::Failed);
                break;
            }

            transition(&mut run, PipelineState::running(stage));
            run.stages[index].status = StageStatus::Running;

            let outcome = self.runner.run(stage, self.stages.action(stage), &token).await;
            let succeeded = outcome.succeeded();
            if let Some(next) = &outcome.token {
                token = next.clone();
            }
            run.stages[index] = outcome;

            if !succeeded {
                error!(
                    stage = %stage,
                    attempts = run.stages[index].attempts,
                    error = run.stages[index].last_error.as_deref().unwrap_or("unknown"),
                    "Stage failed terminally, halting run"
                );
                transition(&mut run, PipelineState::Failed);
                break;
            }
        }

        if !run.state.is_terminal() {
            transition(&mut run, PipelineState::Succeeded);
        }
        run.finished_at = Some(Utc::now());
        self.abort.reset();
        info!(state = ?run.state, "Pipeline run finished");
        run
    }
}

fn transition(run: &mut PipelineRun, next: PipelineState) {
    info!(from = ?run.state, to = ?next, "Pipeline state change");
    run.state = next;
}
