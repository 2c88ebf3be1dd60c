//! Runs the stages in order against a checkpointed schema.

use std::sync::Arc;

use super::{completion_percentage, Stage, StageContext, StageWork};
use crate::checkpoint::{earlier_stages_complete, is_stage_complete, CheckpointStore};
use crate::error::{Error, Result};
use crate::model::{ProcessingStatus, ProgressiveSchema};

/// Receives stage transitions, e.g. to drive a progress display.
pub trait StageObserver: Send + Sync {
    /// A stage is about to run.
    fn stage_started(&self, _stage: Stage) {}

    /// A stage was already complete and did not run.
    fn stage_skipped(&self, _stage: Stage) {}

    /// A stage finished; `error` is set when it failed.
    fn stage_finished(&self, _stage: Stage, _status: &ProcessingStatus, _error: Option<&Error>) {}
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl StageObserver for LogObserver {
    fn stage_finished(&self, stage: Stage, status: &ProcessingStatus, error: Option<&Error>) {
        match error {
            Some(e) => log::error!("Stage {} ({}) failed: {}", stage.number(), stage, e),
            None => log::info!(
                "Stage {} ({}) done, {:.2}% complete",
                stage.number(),
                stage,
                status.completion_percentage
            ),
        }
    }
}

/// Drives a schema through the stages, saving after every transition.
pub struct StageOrchestrator {
    store: CheckpointStore,
    context: StageContext,
    works: Vec<Box<dyn StageWork>>,
    observer: Arc<dyn StageObserver>,
}

impl StageOrchestrator {
    /// Create an orchestrator.
    ///
    /// `works` must cover a contiguous run of stages starting at
    /// [`Stage::Populate`].
    pub fn new(
        store: CheckpointStore,
        context: StageContext,
        works: Vec<Box<dyn StageWork>>,
    ) -> Result<Self> {
        for (i, work) in works.iter().enumerate() {
            if Stage::from_number(i + 1) != Some(work.stage()) {
                return Err(Error::Config(format!(
                    "stage work {} is {}, expected stage {}",
                    i + 1,
                    work.stage(),
                    i + 1
                )));
            }
        }
        Ok(Self {
            store,
            context,
            works,
            observer: Arc::new(LogObserver),
        })
    }

    /// Replace the observer.
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stage context.
    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Checkpoint store.
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run every stage that is not complete yet.
    pub fn run(&self, schema: &mut ProgressiveSchema) -> Result<()> {
        self.run_from(schema, Stage::Populate)
    }

    /// Run stages starting at `from`.
    ///
    /// Complete stages are skipped. The schema is saved when a stage starts,
    /// when it completes and when it fails, so the checkpoint on disk always
    /// reflects the last transition. The first failing stage stops the run.
    pub fn run_from(&self, schema: &mut ProgressiveSchema, from: Stage) -> Result<()> {
        for work in self.works.iter().skip(from.number() - 1) {
            self.run_stage(schema, work.as_ref())?;
        }
        Ok(())
    }

    fn run_stage(&self, schema: &mut ProgressiveSchema, work: &dyn StageWork) -> Result<()> {
        let stage = work.stage();

        if let Some(required) = stage.previous() {
            if !earlier_stages_complete(schema, stage) {
                return Err(Error::StageOrder {
                    stage: stage.name().to_string(),
                    required: required.name().to_string(),
                });
            }
        }

        if is_stage_complete(schema, stage) {
            log::debug!("Stage {} ({}) already complete", stage.number(), stage);
            self.observer.stage_skipped(stage);
            return Ok(());
        }

        log::info!("Stage {} ({}) starting", stage.number(), stage);
        self.observer.stage_started(stage);
        schema.processing_status.begin(stage.number(), stage.name());
        self.store.save(schema)?;

        let outcome = work.run(schema, &self.context).and_then(|()| {
            if is_stage_complete(schema, stage) {
                Ok(())
            } else {
                Err(Error::Invariant(format!(
                    "{} returned without populating its fields",
                    stage
                )))
            }
        });

        let completion = completion_percentage(schema);
        match outcome {
            Ok(()) => {
                schema
                    .processing_status
                    .complete(stage.number(), stage.name(), completion);
                self.store.save(schema)?;
                self.observer.stage_finished(stage, &schema.processing_status, None);
                Ok(())
            }
            Err(error) => {
                schema
                    .processing_status
                    .fail(stage.number(), stage.name(), error.to_string());
                schema.processing_status.raise_completion(completion);
                self.store.save(schema)?;

                let error = if error.is_fatal_to_run() {
                    error
                } else {
                    Error::Stage {
                        stage: stage.name().to_string(),
                        source: Box::new(error),
                    }
                };
                self.observer
                    .stage_finished(stage, &schema.processing_status, Some(&error));
                Err(error)
            }
        }
    }
}
