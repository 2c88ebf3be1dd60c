//! Unit-level types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ElementKind, SubElement};
use crate::error::Result;

/// One independently processable slice of the source (usually a page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Position in the source (1-indexed)
    pub index: u32,

    /// Owning document
    pub document_id: String,

    /// Raw slice handed to the extractor
    pub source: UnitSource,

    /// Working directory for unit-local artifacts
    #[serde(default)]
    pub workdir: PathBuf,

    /// Content produced by extraction
    #[serde(default)]
    pub raw_content: String,

    /// Elements produced by extraction
    #[serde(default)]
    pub sub_elements: Vec<SubElement>,

    /// Set when extraction failed for this unit
    #[serde(default)]
    pub error: Option<UnitFailure>,
}

impl Unit {
    /// Create a unit that has not been processed yet.
    pub fn new(index: u32, document_id: impl Into<String>, source: UnitSource) -> Self {
        Self {
            index,
            document_id: document_id.into(),
            source,
            workdir: PathBuf::new(),
            raw_content: String::new(),
            sub_elements: Vec::new(),
            error: None,
        }
    }

    /// Place the unit's working directory under `output_root`.
    pub fn with_workdir(mut self, output_root: &Path) -> Self {
        self.workdir = unit_workdir(output_root, self.index);
        self
    }

    /// Zero-based output slot.
    pub fn slot(&self) -> usize {
        self.index.saturating_sub(1) as usize
    }

    /// Id allocator for elements produced from this unit.
    pub fn ids(&self) -> ElementIds {
        ElementIds::new(&self.document_id, self.index)
    }

    /// Whether extraction failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Attach extraction output.
    pub fn apply(&mut self, output: UnitOutput) {
        self.raw_content = output.raw_content;
        self.sub_elements = output.sub_elements;
        self.error = None;
    }

    /// Record a failure, leaving valid empty defaults in place.
    pub fn fail(&mut self, failure: UnitFailure) {
        self.raw_content.clear();
        self.sub_elements.clear();
        self.error = Some(failure);
    }

    /// Read the raw slice text.
    pub fn read_source(&self) -> Result<String> {
        match &self.source {
            UnitSource::Inline { text, .. } => Ok(text.clone()),
            UnitSource::File { path } => Ok(std::fs::read_to_string(path)?),
        }
    }

    /// Directory that relative references inside the unit resolve against.
    pub fn origin_dir(&self) -> &Path {
        let origin = match &self.source {
            UnitSource::Inline { origin, .. } => origin.as_path(),
            UnitSource::File { path } => path.as_path(),
        };
        origin.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Working directory of unit `index`: `{output_root}/unit_{index}`.
pub fn unit_workdir(output_root: &Path, index: u32) -> PathBuf {
    output_root.join(format!("unit_{}", index))
}

/// Where a unit's raw slice comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitSource {
    /// Page text cut out of a larger file
    Inline {
        /// Page text
        text: String,
        /// File the text was cut from
        origin: PathBuf,
    },
    /// A page stored in its own file
    File {
        /// Page file
        path: PathBuf,
    },
}

/// What a worker returns for a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutput {
    /// Extracted content
    pub raw_content: String,
    /// Extracted elements
    #[serde(default)]
    pub sub_elements: Vec<SubElement>,
}

impl UnitOutput {
    /// Output with text only.
    pub fn text(raw_content: impl Into<String>) -> Self {
        Self {
            raw_content: raw_content.into(),
            sub_elements: Vec::new(),
        }
    }
}

/// A recorded per-unit failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Failure description
    pub message: String,
}

impl UnitFailure {
    /// The worker returned an error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Failed,
            message: message.into(),
        }
    }

    /// The worker panicked.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Panicked,
            message: message.into(),
        }
    }

    /// The pool deadline passed before the unit finished.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::TimedOut,
            message: message.into(),
        }
    }

    /// Whether this failure came from a deadline.
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::TimedOut
    }
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Category of a unit failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worker returned an error
    Failed,
    /// Worker panicked
    Panicked,
    /// Deadline expired
    TimedOut,
}

/// Collision-free element id allocator owned by a single unit.
///
/// Ids look like `{document}-u0003-img002`: the unit index keeps allocators of
/// different units disjoint, so workers never share a counter.
#[derive(Debug, Clone)]
pub struct ElementIds {
    prefix: String,
    next: u32,
}

impl ElementIds {
    /// Allocator for `index` within `document_id`.
    pub fn new(document_id: &str, index: u32) -> Self {
        Self {
            prefix: format!("{}-u{:04}", document_id, index),
            next: 0,
        }
    }

    /// Next id carrying `tag`.
    pub fn next_tagged(&mut self, tag: &str) -> String {
        self.next += 1;
        format!("{}-{}{:03}", self.prefix, tag, self.next)
    }

    /// Next id for an element of `kind`.
    pub fn next_for(&mut self, kind: ElementKind) -> String {
        self.next_tagged(kind.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline_unit(index: u32) -> Unit {
        Unit::new(
            index,
            "doc",
            UnitSource::Inline {
                text: format!("page {}", index),
                origin: PathBuf::from("/data/book.txt"),
            },
        )
    }

    #[test]
    fn test_unit_workdir() {
        let unit = inline_unit(3).with_workdir(Path::new("/out"));
        assert_eq!(unit.workdir, PathBuf::from("/out/unit_3"));
        assert_eq!(unit.slot(), 2);
    }

    #[test]
    fn test_unit_fail_resets_content() {
        let mut unit = inline_unit(1);
        unit.apply(UnitOutput::text("hello"));
        unit.fail(UnitFailure::failed("extraction failed"));
        assert!(unit.raw_content.is_empty());
        assert!(unit.sub_elements.is_empty());
        assert_eq!(unit.error.as_ref().unwrap().message, "extraction failed");
    }

    #[test]
    fn test_origin_dir() {
        let unit = inline_unit(1);
        assert_eq!(unit.origin_dir(), Path::new("/data"));
        assert_eq!(unit.read_source().unwrap(), "page 1");
    }

    #[test]
    fn test_element_ids_are_disjoint_per_unit() {
        let mut a = ElementIds::new("doc", 1);
        let mut b = ElementIds::new("doc", 2);
        let first = a.next_for(ElementKind::Image);
        let second = a.next_for(ElementKind::Table);
        let other = b.next_for(ElementKind::Image);
        assert_eq!(first, "doc-u0001-img001");
        assert_eq!(second, "doc-u0001-tbl002");
        assert_eq!(other, "doc-u0002-img001");
    }
}
