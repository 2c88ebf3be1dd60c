//! Collaborators the stages call out to.
//!
//! Each trait is a narrow seam for an external service (an OCR engine, a
//! language model, ...). The default implementations are local heuristics so
//! the pipeline runs end to end without any service.

mod cleanup;
mod describe;
mod extract;
mod outline;
mod summary;

use std::path::Path;
use std::sync::Arc;

pub use cleanup::{CleanupRepairer, RepairOptions, RepairPreset};
pub use describe::ContextDescriber;
pub use extract::PlainTextExtractor;
pub use outline::HeadingOutliner;
pub use summary::ExtractiveSummarizer;

use crate::error::Result;
use crate::model::{MediaDescription, StructuralNode, SubElement};
use crate::pool::UnitWorker;

/// Repairs extraction artifacts in unit text.
pub trait TextRepairer: Send + Sync {
    /// Return the repaired text.
    fn repair(&self, text: &str) -> Result<String>;
}

/// Describes images and tables.
pub trait MediaDescriber: Send + Sync {
    /// Describe `element`.
    ///
    /// `payload` is the resolved payload file for path payloads, `context`
    /// the text around the element.
    fn describe(
        &self,
        payload: Option<&Path>,
        element: &SubElement,
        context: &str,
    ) -> Result<MediaDescription>;
}

/// Extracts a coarse outline from the document text.
pub trait OutlineExtractor: Send + Sync {
    /// Outline nodes in document order, parents before children.
    fn extract_outline(&self, document_id: &str, full_text: &str) -> Result<Vec<StructuralNode>>;
}

/// Summarizes one top-level section.
pub trait ChapterSummarizer: Send + Sync {
    /// Summary and follow-up questions for the section `title`.
    fn summarize(&self, title: &str, text: &str) -> Result<ChapterDigest>;
}

/// Output of a [`ChapterSummarizer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterDigest {
    /// Summary text
    pub summary: String,
    /// Questions the section answers
    pub questions: Vec<String>,
}

/// The set of collaborators used by the built-in stages.
#[derive(Clone)]
pub struct Collaborators {
    /// Per-unit extraction
    pub extractor: Arc<dyn UnitWorker>,
    /// Unit text repair
    pub repairer: Arc<dyn TextRepairer>,
    /// Outline extraction
    pub outliner: Arc<dyn OutlineExtractor>,
    /// Image and table descriptions
    pub describer: Arc<dyn MediaDescriber>,
    /// Chapter summaries
    pub summarizer: Arc<dyn ChapterSummarizer>,
}

impl Collaborators {
    /// Replace the extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn UnitWorker>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the repairer.
    pub fn with_repairer(mut self, repairer: Arc<dyn TextRepairer>) -> Self {
        self.repairer = repairer;
        self
    }

    /// Replace the outline extractor.
    pub fn with_outliner(mut self, outliner: Arc<dyn OutlineExtractor>) -> Self {
        self.outliner = outliner;
        self
    }

    /// Replace the media describer.
    pub fn with_describer(mut self, describer: Arc<dyn MediaDescriber>) -> Self {
        self.describer = describer;
        self
    }

    /// Replace the summarizer.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn ChapterSummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            extractor: Arc::new(PlainTextExtractor::new()),
            repairer: Arc::new(CleanupRepairer::default()),
            outliner: Arc::new(HeadingOutliner::new()),
            describer: Arc::new(ContextDescriber::new()),
            summarizer: Arc::new(ExtractiveSummarizer::default()),
        }
    }
}

/// Lower-cased words of at least four letters, most frequent first.
pub(crate) fn keywords(text: &str, limit: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "this", "that", "with", "from", "have", "were", "which", "their", "there", "these",
        "those", "been", "into", "than", "then", "they", "will", "would", "about", "also",
        "when", "what", "where", "while", "page", "image", "table",
    ];

    let mut counts: Vec<(String, usize, usize)> = Vec::new();
    for (position, word) in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4 && !w.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_lowercase)
        .enumerate()
    {
        if STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        match counts.iter_mut().find(|(w, _, _)| *w == word) {
            Some(entry) => entry.1 += 1,
            None => counts.push((word, 1, position)),
        }
    }
    // Ties keep first-occurrence order.
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    counts.into_iter().take(limit).map(|(w, _, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_by_frequency() {
        let words = keywords("Storm clouds. The storm broke; rain and more rain, storm.", 2);
        assert_eq!(words, vec!["storm", "rain"]);
    }

    #[test]
    fn test_keywords_skip_noise() {
        assert!(keywords("this that 2024 with", 5).is_empty());
    }
}
