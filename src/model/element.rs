//! Typed content fragments extracted from units.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Maximum characters kept in [`SubElement::context_snippet`].
pub const CONTEXT_SNIPPET_MAX: usize = 300;

/// A typed content fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubElement {
    /// Globally unique, stable id
    pub content_id: String,

    /// Owning document
    pub document_id: String,

    /// Unit the element came from (1-indexed)
    pub unit_index: u32,

    /// Text, image or table
    pub kind: ElementKind,

    /// Where the content lives
    pub payload: Payload,

    /// Structural position, filled once by the assigner
    #[serde(default)]
    pub structural_id: Option<String>,

    /// Bounded text around the element, used for structural matching
    #[serde(default)]
    pub context_snippet: String,

    /// Filled once by the description stage (images and tables)
    #[serde(default)]
    pub description: Option<MediaDescription>,
}

impl SubElement {
    /// Create an unassigned element.
    pub fn new(
        content_id: impl Into<String>,
        document_id: impl Into<String>,
        unit_index: u32,
        kind: ElementKind,
        payload: Payload,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            document_id: document_id.into(),
            unit_index,
            kind,
            payload,
            structural_id: None,
            context_snippet: String::new(),
            description: None,
        }
    }

    /// Set the context snippet, bounded to [`CONTEXT_SNIPPET_MAX`].
    pub fn with_context(mut self, context: &str) -> Self {
        self.context_snippet = bounded_snippet(context, CONTEXT_SNIPPET_MAX);
        self
    }

    /// Assign a structural position unless one is already set.
    ///
    /// Returns `false` (and leaves the element untouched) if it was assigned.
    pub fn assign_structure(&mut self, structural_id: impl Into<String>) -> bool {
        if self.structural_id.is_some() {
            return false;
        }
        self.structural_id = Some(structural_id.into());
        true
    }

    /// Attach a description unless one is already set.
    pub fn describe(&mut self, description: MediaDescription) -> bool {
        if self.description.is_some() {
            return false;
        }
        self.description = Some(description);
        true
    }

    /// Whether this is an image or a table.
    pub fn is_media(&self) -> bool {
        matches!(self.kind, ElementKind::Image | ElementKind::Table)
    }

    /// Inline content, if the payload is inline.
    pub fn inline_content(&self) -> Option<&str> {
        match &self.payload {
            Payload::Inline(content) => Some(content),
            Payload::Path(_) => None,
        }
    }
}

/// Element variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Text chunk
    Text,
    /// Image
    Image,
    /// Table
    Table,
}

impl ElementKind {
    /// Short tag used in content ids.
    pub fn tag(&self) -> &'static str {
        match self {
            ElementKind::Text => "txt",
            ElementKind::Image => "img",
            ElementKind::Table => "tbl",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Text => write!(f, "text"),
            ElementKind::Image => write!(f, "image"),
            ElementKind::Table => write!(f, "table"),
        }
    }
}

/// Element payload: a file in the unit working directory, or inline content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// Path relative to `{outputRoot}/unit_{index}/`
    Path(PathBuf),
    /// Content stored in the checkpoint itself
    Inline(String),
}

impl Payload {
    /// File backing a path payload, resolved against the unit working directory.
    ///
    /// Paths that would leave `workdir` resolve to nothing.
    pub fn resolve(&self, workdir: &Path) -> Option<PathBuf> {
        match self {
            Payload::Path(path) if is_confined(path) => Some(workdir.join(path)),
            Payload::Path(path) => {
                log::warn!("Ignoring payload path outside the unit directory: {}", path.display());
                None
            }
            Payload::Inline(_) => None,
        }
    }
}

/// Whether `path` is relative and never climbs above its base directory.
pub fn is_confined(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Structured description of an image or table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescription {
    /// One or two sentence summary
    pub summary: String,

    /// Salient terms
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Caption or alt text found in the source
    #[serde(default)]
    pub caption: Option<String>,
}

/// Trim `text` and cut it to at most `max_chars` characters.
pub fn bounded_snippet(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Text around the byte range `start..end` of `text`, at most `max_chars` long.
///
/// The window is centred on the range and always lands on char boundaries.
pub fn context_window(text: &str, start: usize, end: usize, max_chars: usize) -> String {
    let start = floor_char_boundary(text, start.min(text.len()));
    let end = floor_char_boundary(text, end.min(text.len())).max(start);

    let inner = text[start..end].chars().count();
    let budget = max_chars.saturating_sub(inner.min(max_chars));
    let before_budget = budget / 2;
    let after_budget = budget - before_budget;

    let before: String = {
        let mut chars: Vec<char> = text[..start].chars().rev().take(before_budget).collect();
        chars.reverse();
        chars.into_iter().collect()
    };
    let after: String = text[end..].chars().take(after_budget).collect();
    let middle: String = text[start..end].chars().take(max_chars).collect();

    bounded_snippet(&format!("{}{}{}", before, middle, after), max_chars)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
