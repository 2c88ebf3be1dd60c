//! Integration tests for checkpoint persistence.

use std::fs;
use std::path::PathBuf;

use pagewise::checkpoint::{self, CheckpointStore};
use pagewise::model::{
    ChapterSummary, DerivedQuestion, ElementKind, MediaDescription, Payload, StructuralNode,
    SubElement, UnitFailure, UnitRecord,
};
use pagewise::{is_stage_complete, Error, ProgressiveSchema, Stage};

fn full_schema() -> ProgressiveSchema {
    let mut schema = ProgressiveSchema::new("book", "/data/book.txt");
    let summary = &mut schema.document_summary;
    summary.page_count = 3;
    summary.units = vec![
        UnitRecord::extracted(1, "Chapter One\n\nThe harbor."),
        UnitRecord::extracted(2, "Chapter Two\n\nThe storm."),
        UnitRecord::failed(3, UnitFailure::failed("extraction failed")),
    ];
    summary.units[0].cleaned_text = Some("Chapter One\n\nThe harbor.".into());
    summary.units[0].chunk_ids = Some(vec!["book-u0001-chk001".into()]);

    let one = StructuralNode::new("book-s001", "Chapter One");
    let section = StructuralNode::new("book-s002", "Arrival").child_of(&one);
    summary.outline = Some(vec![one, section]);

    let mut text = SubElement::new(
        "book-u0001-chk001",
        "book",
        1,
        ElementKind::Text,
        Payload::Inline("Chapter One\n\nThe harbor.".into()),
    )
    .with_context("Chapter One");
    text.assign_structure("book-s001");

    let mut image = SubElement::new(
        "book-u0001-img001",
        "book",
        1,
        ElementKind::Image,
        Payload::Path(PathBuf::from("book-u0001-img001.png")),
    )
    .with_context("Figure 1: the harbor at dawn");
    image.describe(MediaDescription {
        summary: "Image: the harbor at dawn.".into(),
        keywords: vec!["harbor".into(), "dawn".into()],
        caption: Some("Figure 1: the harbor at dawn".into()),
    });

    let table = SubElement::new(
        "book-u0002-tbl001",
        "book",
        2,
        ElementKind::Table,
        Payload::Inline("| a | b |\n|---|---|\n| 1 | 2 |".into()),
    );

    schema.add_elements(vec![text, image, table]).unwrap();
    schema.chapter_summaries.push(ChapterSummary {
        structural_id: "book-s001".into(),
        title: "Chapter One".into(),
        summary: "The harbor.".into(),
    });
    schema.derived_questions.push(DerivedQuestion {
        question_id: "book-s001-q1".into(),
        structural_id: "book-s001".into(),
        question: "What is covered in \"Chapter One\"?".into(),
    });
    schema
}

#[test]
fn test_round_trip_keeps_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let schema = full_schema();

    let path = store.save(&schema).unwrap();
    let loaded = store.load(&path).unwrap();
    assert_eq!(loaded, schema);

    // Nulls stay null and variants keep their tags.
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["schemaVersion"], schema.schema_version.as_str());
    assert!(json["tableChunks"][0]["description"].is_null());
    assert!(json["imageChunks"][0]["payload"]["path"].is_string());
    assert!(json["textChunks"][0]["payload"]["inline"].is_string());
}

#[test]
fn test_save_overwrites_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let mut schema = full_schema();
    store.save(&schema).unwrap();

    schema.document_summary.units[1].cleaned_text = Some("repaired".into());
    let path = store.save(&schema).unwrap();

    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "no temporary files left behind");
    assert_eq!(checkpoint::load(&path).unwrap(), schema);
}

#[test]
fn test_future_major_version_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let path = store.save(&full_schema()).unwrap();

    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    json["schemaVersion"] = "99.0.0".into();
    fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();

    match checkpoint::load(&path) {
        Err(Error::CheckpointVersion { found, .. }) => assert_eq!(found, "99.0.0"),
        other => panic!("expected a version error, got {:?}", other),
    }
    assert!(!checkpoint::can_resume(&path, Stage::UnitRepair));
}

#[test]
fn test_invalid_checkpoint_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let path = store.save(&full_schema()).unwrap();

    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    json["tableChunks"][0]["documentId"] = "other".into();
    fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();

    assert!(matches!(checkpoint::load(&path), Err(Error::Invariant(_))));
}

#[test]
fn test_completeness_after_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let path = store.save(&full_schema()).unwrap();
    let loaded = store.load(&path).unwrap();

    assert!(is_stage_complete(&loaded, Stage::Populate));
    // Unit 2 has no cleaned text yet.
    assert!(!is_stage_complete(&loaded, Stage::UnitRepair));
    assert!(is_stage_complete(&loaded, Stage::StructureRecognition));
    // The table has no description.
    assert!(!is_stage_complete(&loaded, Stage::ElementDescription));
}
