//! End-to-end tests for staged processing and resumption.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pagewise::checkpoint::{self, CheckpointStore};
use pagewise::collab::TextRepairer;
use pagewise::stage::{PopulateStage, StageWork};
use pagewise::{
    Collaborators, Error, Pipeline, PipelineConfig, Result, Stage, StageContext,
    StageOrchestrator, Unit, UnitOutput, UnitWorker,
};

const PAGES: [&str; 5] = [
    "# Chapter One\n\nThe harbor was quiet at dawn.",
    "Fishermen mended their nets along the pier.",
    "This page is unreadable.",
    "# Chapter Two\n\nThe storm arrived by noon.",
    "Boats strained against their moorings.",
];

fn write_source(dir: &Path) -> PathBuf {
    let source = dir.join("harbor.txt");
    fs::write(&source, PAGES.join("\x0c")).unwrap();
    source
}

fn config(dir: &Path) -> PipelineConfig {
    PipelineConfig::new()
        .with_output_root(dir.join("out"))
        .with_max_workers(2)
        .with_base_delay_seconds(0.01)
}

/// Extractor that fails unit 3 and counts its calls.
fn extractor(calls: Arc<AtomicUsize>) -> Arc<dyn UnitWorker> {
    Arc::new(move |unit: &Unit| -> Result<UnitOutput> {
        calls.fetch_add(1, Ordering::SeqCst);
        if unit.index == 3 {
            return Err(Error::Other("extraction failed".into()));
        }
        Ok(UnitOutput::text(unit.read_source()?))
    })
}

struct CountingRepairer {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingRepairer {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }
}

impl TextRepairer for CountingRepairer {
    fn repair(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Auth("repair service rejected the key".into()));
        }
        Ok(text.trim().to_string())
    }
}

#[test]
fn test_failed_unit_does_not_block_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let config = config(dir.path());
    let store = CheckpointStore::new(&config.output_root);
    let works: Vec<Box<dyn StageWork>> =
        vec![Box::new(PopulateStage::new(extractor(calls.clone())))];
    let orchestrator =
        StageOrchestrator::new(store.clone(), StageContext::new(config), works).unwrap();

    let mut schema = pagewise::ProgressiveSchema::new("harbor", &source);
    orchestrator.run(&mut schema).unwrap();

    let saved = store.load_document("harbor").unwrap().unwrap();
    assert_eq!(saved.processing_status.current_stage, "1_completed");
    assert_eq!(saved.processing_status.completion_percentage, 11.43);
    assert_eq!(saved.document_summary.page_count, 5);
    assert_eq!(saved.document_summary.available_units().count(), 4);

    let failed = saved.document_summary.unit(3).unwrap();
    assert!(failed.raw_text.is_none());
    assert_eq!(failed.error.as_ref().unwrap().message, "extraction failed");
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_resume_after_stage_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let extractions = Arc::new(AtomicUsize::new(0));

    // First run: repair fails for every unit.
    let broken = CountingRepairer::new(true);
    let pipeline = Pipeline::new(config(dir.path())).with_collaborators(
        Collaborators::default()
            .with_extractor(extractor(extractions.clone()))
            .with_repairer(broken.clone()),
    );
    let err = pipeline.process_file(&source).unwrap_err();
    assert!(matches!(err, Error::Stage { ref stage, .. } if stage == "unit-repair"));
    assert_eq!(broken.calls.load(Ordering::SeqCst), 4);

    let path = pipeline.store().location_for("harbor");
    let saved = checkpoint::load(&path).unwrap();
    assert_eq!(saved.processing_status.current_stage, "2_failed");
    assert_eq!(saved.processing_status.completion_percentage, 11.43);
    assert!(saved.processing_status.error_message.is_some());
    assert!(checkpoint::can_resume(&path, Stage::UnitRepair));
    assert!(!checkpoint::can_resume(&path, Stage::StructureRecognition));

    // Second run: extraction is not repeated.
    let working = CountingRepairer::new(false);
    let pipeline = Pipeline::new(config(dir.path())).with_collaborators(
        Collaborators::default()
            .with_extractor(extractor(extractions.clone()))
            .with_repairer(working.clone()),
    );
    let schema = pipeline.process_file_from(&source, Stage::UnitRepair).unwrap();

    assert_eq!(extractions.load(Ordering::SeqCst), 5);
    assert_eq!(working.calls.load(Ordering::SeqCst), 4);
    assert_eq!(schema.processing_status.current_stage, "7_completed");
    // Extraction stays at 4/5; every other stage is done.
    assert_eq!(schema.processing_status.completion_percentage, 97.14);

    let titles: Vec<&str> = schema.outline().iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter One", "Chapter Two"]);
    assert_eq!(schema.chapter_summaries.len(), 2);
    assert!(schema.elements().all(|e| e.structural_id.is_some()));

    // A third run has nothing left to do.
    let again = pipeline.process_file(&source).unwrap();
    assert_eq!(extractions.load(Ordering::SeqCst), 5);
    assert_eq!(working.calls.load(Ordering::SeqCst), 4);
    assert_eq!(again.chapter_summaries, schema.chapter_summaries);
}

#[test]
fn test_stage_order_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let pipeline = Pipeline::new(config(dir.path()));

    let err = pipeline
        .process_file_from(&source, Stage::ContentChunking)
        .unwrap_err();
    assert!(matches!(err, Error::StageOrder { .. }));
    assert!(!pipeline.store().location_for("harbor").exists());
}

#[test]
fn test_incompatible_checkpoint_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let pipeline = Pipeline::new(config(dir.path()));
    pipeline.process_file(&source).unwrap();

    let path = pipeline.store().location_for("harbor");
    let text = fs::read_to_string(&path).unwrap();
    let mut json: serde_json::Value = serde_json::from_str(&text).unwrap();
    json["schemaVersion"] = "99.0.0".into();
    fs::write(&path, json.to_string()).unwrap();

    assert!(matches!(
        pipeline.process_file(&source),
        Err(Error::CheckpointVersion { .. })
    ));
}
