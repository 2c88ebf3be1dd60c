//! # pagewise
//!
//! Progressive, checkpointed document processing.
//!
//! A source document is split into units (pages), every unit is extracted in
//! parallel with per-unit isolation, and the result is enriched by a fixed
//! sequence of stages: text repair, outline extraction, chunking, media
//! description, structural assignment and chapter summaries. The whole state
//! lives in one [`ProgressiveSchema`] that is saved after every stage
//! transition, so an interrupted run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pagewise::{Pipeline, PipelineConfig};
//!
//! fn main() -> pagewise::Result<()> {
//!     let config = PipelineConfig::new()
//!         .with_output_root("./out")
//!         .with_max_workers(4);
//!
//!     let schema = Pipeline::new(config).process_file("book.txt")?;
//!     println!("{}% complete", schema.processing_status.completion_percentage);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded parallelism**: thread or child-process workers, ordered results
//! - **Failure isolation**: a failing or panicking unit never aborts the batch
//! - **Checkpoints**: atomic JSON saves, resumable from any completed stage
//! - **Retries**: linear backoff around every collaborator call
//! - **Pluggable collaborators**: repair, outline, description and summary traits

pub mod assign;
pub mod checkpoint;
pub mod collab;
pub mod config;
pub mod detect;
pub mod error;
pub mod model;
pub mod pool;
pub mod retry;
pub mod split;
pub mod stage;

// Re-export commonly used types
pub use assign::{AssignmentReport, Placement, StructuralAssigner};
pub use checkpoint::{can_resume, is_stage_complete, CheckpointStore};
pub use collab::{
    ChapterSummarizer, Collaborators, MediaDescriber, OutlineExtractor, PlainTextExtractor,
    TextRepairer,
};
pub use config::{ExecutionMode, PipelineConfig};
pub use error::{Error, ErrorClass, Result};
pub use model::{
    ElementKind, MediaDescription, Payload, ProcessingStatus, ProgressiveSchema,
    StructuralNode, SubElement, Unit, UnitFailure, UnitOutput,
};
pub use pool::{PoolOptions, UnitWorker, WorkerPool};
pub use retry::RetryPolicy;
pub use stage::{Stage, StageContext, StageObserver, StageOrchestrator, StageProgress};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

/// Builder that runs documents through every stage.
///
/// # Example
///
/// ```no_run
/// use pagewise::{Pipeline, PipelineConfig, Stage};
///
/// let schema = Pipeline::new(PipelineConfig::new().with_output_root("./out"))
///     .sequential()
///     .process_file_from("book.txt", Stage::UnitRepair)?;
/// # Ok::<(), pagewise::Error>(())
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    observer: Option<Arc<dyn StageObserver>>,
}

impl Pipeline {
    /// Create a pipeline with the built-in collaborators.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            collaborators: Collaborators::default(),
            observer: None,
        }
    }

    /// Replace the collaborators.
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Replace the unit extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn UnitWorker>) -> Self {
        self.collaborators = self.collaborators.with_extractor(extractor);
        self
    }

    /// Receive stage transitions.
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run everything on the calling thread.
    pub fn sequential(mut self) -> Self {
        self.config = self.config.sequential();
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Checkpoint store under the configured output root.
    pub fn store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.config.output_root)
    }

    /// Document id for `source`: the configured override, else the file stem.
    pub fn document_id_for(&self, source: &Path) -> String {
        match &self.config.document_id {
            Some(id) => id.clone(),
            None => document_id_from_path(source),
        }
    }

    /// The checkpointed schema of `source`, or a fresh one.
    pub fn open<P: AsRef<Path>>(&self, source: P) -> Result<ProgressiveSchema> {
        let source = source.as_ref();
        let document_id = self.document_id_for(source);
        match self.store().load_document(&document_id)? {
            Some(schema) => {
                log::info!(
                    "Resuming {} from checkpoint ({}, {:.2}% complete)",
                    document_id,
                    schema.processing_status.current_stage,
                    schema.processing_status.completion_percentage
                );
                Ok(schema)
            }
            None => {
                let source_path =
                    std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
                Ok(ProgressiveSchema::new(document_id, source_path))
            }
        }
    }

    /// Orchestrator over the built-in stages.
    pub fn orchestrator(&self) -> Result<StageOrchestrator> {
        let orchestrator = StageOrchestrator::new(
            self.store(),
            StageContext::new(self.config.clone()),
            stage::builtin_stages(&self.collaborators),
        )?;
        Ok(match &self.observer {
            Some(observer) => orchestrator.with_observer(observer.clone()),
            None => orchestrator,
        })
    }

    /// Process `source` through every incomplete stage.
    pub fn process_file<P: AsRef<Path>>(&self, source: P) -> Result<ProgressiveSchema> {
        self.process_file_from(source, Stage::Populate)
    }

    /// Process `source` starting at `from`.
    ///
    /// Stages before `from` must already be complete in the checkpoint.
    pub fn process_file_from<P: AsRef<Path>>(
        &self,
        source: P,
        from: Stage,
    ) -> Result<ProgressiveSchema> {
        self.config.validate()?;
        let mut schema = self.open(source)?;
        self.orchestrator()?.run_from(&mut schema, from)?;
        Ok(schema)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

/// Document id derived from a file name: the stem with anything outside
/// `[A-Za-z0-9_-]` replaced by `-`.
pub fn document_id_from_path(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let id = id.trim_matches('-');
    if id.is_empty() {
        "document".to_string()
    } else {
        id.to_string()
    }
}

/// Snapshot of a checkpoint for status reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStatus {
    /// Checkpoint file
    pub path: PathBuf,
    /// Document id
    pub document_id: String,
    /// Schema version of the file
    pub schema_version: String,
    /// Recorded status
    pub processing_status: ProcessingStatus,
    /// Number of units
    pub page_count: u32,
    /// Units that failed extraction
    pub failed_units: Vec<u32>,
    /// Progress of every stage
    pub stages: Vec<StageProgress>,
}

/// Load the checkpoint at `path` and report its progress.
pub fn checkpoint_status<P: AsRef<Path>>(path: P) -> Result<CheckpointStatus> {
    let path = path.as_ref();
    let schema = checkpoint::load(path)?;
    Ok(CheckpointStatus {
        path: path.to_path_buf(),
        failed_units: schema
            .document_summary
            .failed_units()
            .map(|u| u.index)
            .collect(),
        page_count: schema.document_summary.page_count,
        stages: stage::stage_progress(&schema),
        document_id: schema.document_id,
        schema_version: schema.schema_version,
        processing_status: schema.processing_status,
    })
}
