//! Document-level aggregate.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    root_node, validate_outline, ElementKind, ProcessingStatus, StructuralNode, SubElement, Unit,
    UnitFailure,
};
use crate::error::{Error, Result};

/// Schema version written into every checkpoint.
pub const SCHEMA_VERSION: &str = "3.1.0";

/// Everything extracted from one document, plus its processing status.
///
/// The schema is append-only: stages add elements and fill empty fields, they
/// never remove or overwrite populated content. That is what makes it safe to
/// reload a checkpoint and continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveSchema {
    /// Semantic version of the layout
    pub schema_version: String,

    /// Document id
    pub document_id: String,

    /// Processing status
    pub processing_status: ProcessingStatus,

    /// Source-level information and per-unit text
    pub document_summary: DocumentSummary,

    /// Text elements
    #[serde(default)]
    pub text_chunks: Vec<SubElement>,

    /// Image elements
    #[serde(default)]
    pub image_chunks: Vec<SubElement>,

    /// Table elements
    #[serde(default)]
    pub table_chunks: Vec<SubElement>,

    /// One summary per top-level node
    #[serde(default)]
    pub chapter_summaries: Vec<ChapterSummary>,

    /// Questions derived from the outline
    #[serde(default)]
    pub derived_questions: Vec<DerivedQuestion>,
}

impl ProgressiveSchema {
    /// Create an empty schema for `source_path`.
    pub fn new(document_id: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            document_id: document_id.into(),
            processing_status: ProcessingStatus::new(),
            document_summary: DocumentSummary::new(source_path),
            text_chunks: Vec::new(),
            image_chunks: Vec::new(),
            table_chunks: Vec::new(),
            chapter_summaries: Vec::new(),
            derived_questions: Vec::new(),
        }
    }

    /// Add one element.
    pub fn add_element(&mut self, element: SubElement) -> Result<()> {
        self.add_elements(vec![element])
    }

    /// Add elements, enforcing document ownership and id uniqueness.
    ///
    /// Either all elements are added or none.
    pub fn add_elements(&mut self, elements: Vec<SubElement>) -> Result<()> {
        let mut seen: HashSet<String> = self.elements().map(|e| e.content_id.clone()).collect();

        for element in &elements {
            if element.document_id != self.document_id {
                return Err(Error::Invariant(format!(
                    "element {} belongs to document {}, not {}",
                    element.content_id, element.document_id, self.document_id
                )));
            }
            if !seen.insert(element.content_id.clone()) {
                return Err(Error::Invariant(format!(
                    "duplicate content id {}",
                    element.content_id
                )));
            }
        }

        for element in elements {
            match element.kind {
                ElementKind::Text => self.text_chunks.push(element),
                ElementKind::Image => self.image_chunks.push(element),
                ElementKind::Table => self.table_chunks.push(element),
            }
        }
        Ok(())
    }

    /// All elements: text, then images, then tables.
    pub fn elements(&self) -> impl Iterator<Item = &SubElement> {
        self.text_chunks
            .iter()
            .chain(self.image_chunks.iter())
            .chain(self.table_chunks.iter())
    }

    /// All elements, mutably.
    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut SubElement> {
        self.text_chunks
            .iter_mut()
            .chain(self.image_chunks.iter_mut())
            .chain(self.table_chunks.iter_mut())
    }

    /// Images and tables.
    pub fn media(&self) -> impl Iterator<Item = &SubElement> {
        self.image_chunks.iter().chain(self.table_chunks.iter())
    }

    /// Images and tables, mutably.
    pub fn media_mut(&mut self) -> impl Iterator<Item = &mut SubElement> {
        self.image_chunks
            .iter_mut()
            .chain(self.table_chunks.iter_mut())
    }

    /// Total number of elements.
    pub fn element_count(&self) -> usize {
        self.text_chunks.len() + self.image_chunks.len() + self.table_chunks.len()
    }

    /// Find an element by id.
    pub fn element(&self, content_id: &str) -> Option<&SubElement> {
        self.elements().find(|e| e.content_id == content_id)
    }

    /// Outline nodes (empty until structure recognition ran).
    pub fn outline(&self) -> &[StructuralNode] {
        self.document_summary.outline.as_deref().unwrap_or(&[])
    }

    /// Top-level nodes, or the synthetic root if the outline is empty.
    pub fn top_level_nodes(&self) -> Vec<StructuralNode> {
        let top: Vec<StructuralNode> = self
            .outline()
            .iter()
            .filter(|n| n.is_top_level())
            .cloned()
            .collect();
        if top.is_empty() {
            vec![root_node(&self.document_id)]
        } else {
            top
        }
    }

    /// Ids of `node` and every node nested below it.
    pub fn subtree_ids(&self, node_id: &str) -> HashSet<String> {
        let mut ids = HashSet::new();
        ids.insert(node_id.to_string());
        // Parents always precede children, so one pass collects the subtree.
        for node in self.outline() {
            if let Some(parent) = &node.parent_id {
                if ids.contains(parent) {
                    ids.insert(node.structural_id.clone());
                }
            }
        }
        ids
    }

    /// Record a processed unit.
    ///
    /// A unit can only replace a record that is missing or that timed out;
    /// anything else would overwrite populated content.
    pub fn absorb_unit(&mut self, unit: Unit) -> Result<()> {
        let index = unit.index;
        if index == 0 || index > self.document_summary.page_count {
            return Err(Error::Invariant(format!(
                "unit {} is outside 1..={}",
                index, self.document_summary.page_count
            )));
        }

        if let Some(existing) = self.document_summary.unit(index) {
            let replaceable = existing.error.as_ref().is_some_and(UnitFailure::is_timeout);
            if !replaceable {
                return Err(Error::Invariant(format!("unit {} is already recorded", index)));
            }
        }

        let record = match unit.error {
            Some(failure) => UnitRecord::failed(index, failure),
            None => {
                self.add_elements(unit.sub_elements)?;
                UnitRecord::extracted(index, unit.raw_content)
            }
        };
        self.document_summary.put_unit(record);
        Ok(())
    }

    /// Cleaned text of every available unit, falling back to raw text.
    pub fn full_text(&self) -> String {
        self.document_summary
            .units
            .iter()
            .filter_map(|u| u.cleaned_text.as_deref().or(u.raw_text.as_deref()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Re-check invariants (used after loading a checkpoint).
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for element in self.elements() {
            if element.document_id != self.document_id {
                return Err(Error::Invariant(format!(
                    "element {} belongs to document {}",
                    element.content_id, element.document_id
                )));
            }
            if !seen.insert(element.content_id.as_str()) {
                return Err(Error::Invariant(format!(
                    "duplicate content id {}",
                    element.content_id
                )));
            }
        }
        if let Some(outline) = &self.document_summary.outline {
            validate_outline(outline)?;
        }
        Ok(())
    }
}

/// Source-level information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    /// Source file or directory
    pub source_path: PathBuf,

    /// Number of units the source was split into
    #[serde(default)]
    pub page_count: u32,

    /// Per-unit text, ordered by index
    #[serde(default)]
    pub units: Vec<UnitRecord>,

    /// Outline, once structure recognition ran
    #[serde(default)]
    pub outline: Option<Vec<StructuralNode>>,
}

impl DocumentSummary {
    /// Summary for a source that has not been split yet.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            page_count: 0,
            units: Vec::new(),
            outline: None,
        }
    }

    /// Record for `index`.
    pub fn unit(&self, index: u32) -> Option<&UnitRecord> {
        self.units.iter().find(|u| u.index == index)
    }

    /// Mutable record for `index`.
    pub fn unit_mut(&mut self, index: u32) -> Option<&mut UnitRecord> {
        self.units.iter_mut().find(|u| u.index == index)
    }

    /// Units whose extraction succeeded.
    pub fn available_units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.iter().filter(|u| u.raw_text.is_some())
    }

    /// Units whose extraction failed.
    pub fn failed_units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.iter().filter(|u| u.error.is_some())
    }

    fn put_unit(&mut self, record: UnitRecord) {
        match self.units.binary_search_by_key(&record.index, |u| u.index) {
            Ok(pos) => self.units[pos] = record,
            Err(pos) => self.units.insert(pos, record),
        }
    }
}

/// Per-unit text and progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    /// Unit index (1-indexed)
    pub index: u32,

    /// Extracted text
    #[serde(default)]
    pub raw_text: Option<String>,

    /// Repaired text
    #[serde(default)]
    pub cleaned_text: Option<String>,

    /// Text chunks produced from this unit
    #[serde(default)]
    pub chunk_ids: Option<Vec<String>>,

    /// Extraction failure
    #[serde(default)]
    pub error: Option<UnitFailure>,
}

impl UnitRecord {
    /// Record for a successfully extracted unit.
    pub fn extracted(index: u32, raw_text: impl Into<String>) -> Self {
        Self {
            index,
            raw_text: Some(raw_text.into()),
            cleaned_text: None,
            chunk_ids: None,
            error: None,
        }
    }

    /// Record for a failed unit.
    pub fn failed(index: u32, failure: UnitFailure) -> Self {
        Self {
            index,
            raw_text: None,
            cleaned_text: None,
            chunk_ids: None,
            error: Some(failure),
        }
    }

    /// Whether the unit has text to work with.
    pub fn is_available(&self) -> bool {
        self.raw_text.is_some()
    }

    /// Best text for downstream stages.
    pub fn text(&self) -> Option<&str> {
        self.cleaned_text.as_deref().or(self.raw_text.as_deref())
    }
}

/// Summary of one top-level outline node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterSummary {
    /// Summarized node
    pub structural_id: String,
    /// Node title
    pub title: String,
    /// Summary text
    pub summary: String,
}

/// A question derived from the document's structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedQuestion {
    /// Unique question id
    pub question_id: String,
    /// Node the question is about
    pub structural_id: String,
    /// Question text
    pub question: String,
}
