//! Default outline extractor based on heading lines.

use std::collections::HashSet;

use regex::Regex;

use super::OutlineExtractor;
use crate::error::Result;
use crate::model::StructuralNode;

/// Longest line still considered a heading.
const MAX_HEADING_CHARS: usize = 100;

/// Finds markdown headings, "Chapter N" / "Part N" lines and numbered
/// section headings (`2.1 Methods`).
///
/// Levels are normalized so the shallowest heading found is level 1 and no
/// node is more than one level deeper than its parent. A title that repeats
/// (running headers) is kept only the first time.
pub struct HeadingOutliner {
    markdown: Regex,
    division: Regex,
    numbered: Regex,
}

impl HeadingOutliner {
    /// Create an outliner.
    pub fn new() -> Self {
        Self {
            markdown: Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").expect("valid regex"),
            division: Regex::new(r"^(?i)(part|chapter)\s+([0-9]+|[ivxlc]+|[a-z]+)\b")
                .expect("valid regex"),
            numbered: Regex::new(r"^(\d+(?:\.\d+){0,3})\.?\s+(\p{Lu}[^.!?]*)$")
                .expect("valid regex"),
        }
    }

    /// Raw level and title of `line`, if it is a heading.
    fn classify(&self, line: &str) -> Option<(u8, String)> {
        if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
            return None;
        }
        if let Some(caps) = self.markdown.captures(line) {
            return Some((caps[1].len() as u8, caps[2].trim().to_string()));
        }
        let ends_clause = line.ends_with(|c: char| matches!(c, '.' | ',' | ';'));
        if let Some(caps) = self.division.captures(line).filter(|_| !ends_clause) {
            // Parts sit above chapters; markdown levels start at 1 as well.
            let level = if caps[1].eq_ignore_ascii_case("part") { 1 } else { 2 };
            return Some((level, line.to_string()));
        }
        if let Some(caps) = self.numbered.captures(line) {
            let depth = caps[1].split('.').count() as u8;
            if caps[2].split_whitespace().count() <= 10 {
                return Some((depth + 1, line.to_string()));
            }
        }
        None
    }
}

impl Default for HeadingOutliner {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineExtractor for HeadingOutliner {
    fn extract_outline(&self, document_id: &str, full_text: &str) -> Result<Vec<StructuralNode>> {
        let mut seen = HashSet::new();
        let headings: Vec<(u8, String)> = full_text
            .lines()
            .map(str::trim)
            .filter_map(|line| self.classify(line))
            .filter(|(_, title)| seen.insert(title.to_lowercase()))
            .collect();

        let Some(shallowest) = headings.iter().map(|(level, _)| *level).min() else {
            return Ok(Vec::new());
        };

        let mut nodes: Vec<StructuralNode> = Vec::with_capacity(headings.len());
        // Open ancestors: index into `nodes` and normalized heading level.
        let mut stack: Vec<(usize, u8)> = Vec::new();

        for (seq, (raw_level, title)) in headings.into_iter().enumerate() {
            let wanted = raw_level - shallowest + 1;
            while stack.last().is_some_and(|&(_, level)| level >= wanted) {
                stack.pop();
            }

            let id = format!("{}-s{:03}", document_id, seq + 1);
            let node = match stack.last() {
                Some(&(parent, _)) => StructuralNode::new(id, title).child_of(&nodes[parent]),
                None => StructuralNode::new(id, title),
            };
            stack.push((nodes.len(), wanted));
            nodes.push(node);
        }
        Ok(nodes)
    }
}
