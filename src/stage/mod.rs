//! Ordered enrichment stages.
//!
//! A document moves through a fixed sequence of stages. Each stage fills in
//! one group of schema fields; whether it is done is judged from those fields
//! alone (see [`is_stage_complete`](crate::checkpoint::is_stage_complete)), so
//! a checkpoint can be resumed no matter where the previous run stopped.

mod chunking;
mod enrich;
mod orchestrator;
mod populate;
mod progress;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

pub use chunking::{chunk_text, ChunkingStage};
pub use enrich::{AssignmentStage, DescriptionStage, OutlineStage, RepairStage, SummaryStage};
pub use orchestrator::{LogObserver, StageObserver, StageOrchestrator};
pub use populate::PopulateStage;
pub use progress::{completion_percentage, stage_fraction, stage_progress, StageProgress};

use crate::collab::Collaborators;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::model::{unit_workdir, ProgressiveSchema};
use crate::pool::{PoolOptions, WorkerPool};
use crate::retry::RetryPolicy;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Split the source and extract every unit
    Populate,
    /// Repair extracted unit text
    UnitRepair,
    /// Extract the document outline
    StructureRecognition,
    /// Cut unit text into text chunks
    ContentChunking,
    /// Describe images and tables
    ElementDescription,
    /// Link every element to an outline node
    StructureAssignment,
    /// Summarize each top-level section
    ChapterSummary,
}

impl Stage {
    /// All stages in order.
    pub const ALL: [Stage; 7] = [
        Stage::Populate,
        Stage::UnitRepair,
        Stage::StructureRecognition,
        Stage::ContentChunking,
        Stage::ElementDescription,
        Stage::StructureAssignment,
        Stage::ChapterSummary,
    ];

    /// 1-based stage number.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Stage with the given 1-based number.
    pub fn from_number(number: usize) -> Option<Stage> {
        number.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// Stable name used in logs, status and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Populate => "populate",
            Stage::UnitRepair => "unit-repair",
            Stage::StructureRecognition => "structure-recognition",
            Stage::ContentChunking => "content-chunking",
            Stage::ElementDescription => "element-description",
            Stage::StructureAssignment => "structure-assignment",
            Stage::ChapterSummary => "chapter-summary",
        }
    }

    /// Stage that must be complete before this one runs.
    pub fn previous(self) -> Option<Stage> {
        Self::from_number(self.number() - 1)
    }

    /// Stage that follows this one.
    pub fn next(self) -> Option<Stage> {
        Self::from_number(self.number() + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = Error;

    /// Accepts a stage name (`unit-repair`) or number (`2`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(number) = s.parse::<usize>() {
            return Self::from_number(number)
                .ok_or_else(|| Error::Config(format!("no stage number {}", number)));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown stage: {}", s)))
    }
}

/// Everything a stage may use besides the schema.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Pipeline configuration
    pub config: PipelineConfig,
    /// Pool for units and stage sub-tasks
    pub pool: WorkerPool,
    /// Retry policy wrapped around collaborator calls
    pub retry: RetryPolicy,
}

impl StageContext {
    /// Context derived from `config`.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            pool: WorkerPool::new(PoolOptions::from_config(&config)),
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// Replace the pool.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Root for checkpoints and unit working directories.
    pub fn output_root(&self) -> &Path {
        &self.config.output_root
    }

    /// Working directory of unit `index`.
    pub fn unit_workdir(&self, index: u32) -> PathBuf {
        unit_workdir(self.output_root(), index)
    }

    /// Pool for unit extraction, with the configured deadline starting now.
    pub fn extraction_pool(&self) -> WorkerPool {
        match self.config.unit_timeout() {
            Some(timeout) => self.pool.clone().with_deadline(Instant::now() + timeout),
            None => self.pool.clone(),
        }
    }
}

/// The work of one stage.
pub trait StageWork: Send + Sync {
    /// Stage this work implements.
    fn stage(&self) -> Stage;

    /// Fill in the stage's fields.
    ///
    /// Must only add to the schema. Returning `Ok` while leaving the stage
    /// incomplete counts as a failure.
    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()>;
}

/// The built-in work for every stage, in order.
pub fn builtin_stages(collab: &Collaborators) -> Vec<Box<dyn StageWork>> {
    vec![
        Box::new(PopulateStage::new(collab.extractor.clone())),
        Box::new(RepairStage::new(collab.repairer.clone())),
        Box::new(OutlineStage::new(collab.outliner.clone())),
        Box::new(ChunkingStage::new()),
        Box::new(DescriptionStage::new(collab.describer.clone())),
        Box::new(AssignmentStage),
        Box::new(SummaryStage::new(collab.summarizer.clone())),
    ]
}

/// Turn failed sub-tasks into a stage error.
///
/// `failures` holds the id of each failed item and its error.
pub(crate) fn sub_task_failure(
    what: &str,
    total: usize,
    failures: Vec<(String, Error)>,
) -> Result<()> {
    let Some((id, first)) = failures.first() else {
        return Ok(());
    };
    for (id, error) in &failures {
        log::warn!("{} {} failed: {}", what, id, error);
    }
    Err(Error::Other(format!(
        "{} of {} {} failed; first {}: {}",
        failures.len(),
        total,
        what,
        id,
        first
    )))
}
