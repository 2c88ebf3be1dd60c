//! Stage 4: cut unit text into text chunks.

use super::{Stage, StageContext, StageWork};
use crate::error::Result;
use crate::model::{
    bounded_snippet, ElementIds, ElementKind, Payload, ProgressiveSchema, SubElement,
    CONTEXT_SNIPPET_MAX,
};

/// Pack `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs (separated by blank lines) are packed whole where they fit.
/// Longer paragraphs are split between words, and words longer than a chunk
/// are cut. Pipe-table lines are left out; tables are elements of their own.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs(text) {
        for piece in split_long(&paragraph, max_chars) {
            let needed = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 2 + piece.chars().count()
            };
            if needed > max_chars && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !lines.is_empty() {
                out.push(lines.join("\n"));
                lines.clear();
            }
        } else if !trimmed.starts_with('|') {
            lines.push(trimmed);
        }
    }
    if !lines.is_empty() {
        out.push(lines.join("\n"));
    }
    out
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            pieces.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let len = current.chars().count();
        if len > 0 && len + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Turns the text of every available unit into text elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkingStage;

impl ChunkingStage {
    /// New stage.
    pub fn new() -> Self {
        Self
    }
}

impl StageWork for ChunkingStage {
    fn stage(&self) -> Stage {
        Stage::ContentChunking
    }

    fn run(&self, schema: &mut ProgressiveSchema, ctx: &StageContext) -> Result<()> {
        let chunk_size = ctx.config.chunk_size;
        let pending: Vec<(u32, String)> = schema
            .document_summary
            .available_units()
            .filter(|u| u.chunk_ids.is_none())
            .filter_map(|u| u.text().map(|t| (u.index, t.to_string())))
            .collect();

        let mut total = 0;
        for (index, text) in pending {
            let mut ids = ElementIds::new(&schema.document_id, index);
            let elements: Vec<SubElement> = chunk_text(&text, chunk_size)
                .into_iter()
                .map(|chunk| {
                    let context = bounded_snippet(&chunk, CONTEXT_SNIPPET_MAX);
                    SubElement::new(
                        ids.next_tagged("chk"),
                        &schema.document_id,
                        index,
                        ElementKind::Text,
                        Payload::Inline(chunk),
                    )
                    .with_context(&context)
                })
                .collect();

            let chunk_ids: Vec<String> = elements.iter().map(|e| e.content_id.clone()).collect();
            total += chunk_ids.len();
            schema.add_elements(elements)?;
            if let Some(record) = schema.document_summary.unit_mut(index) {
                record.chunk_ids = Some(chunk_ids);
            }
        }

        log::info!("Created {} text chunks", total);
        Ok(())
    }
}
