//! Default chapter summarizer.

use super::{keywords, ChapterDigest, ChapterSummarizer};
use crate::error::Result;
use crate::model::bounded_snippet;

/// Summarizes a section by its leading sentences.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    /// Sentences kept
    pub max_sentences: usize,
    /// Upper bound on summary length, in characters
    pub max_chars: usize,
}

impl ExtractiveSummarizer {
    /// Create a summarizer.
    pub fn new(max_sentences: usize, max_chars: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
            max_chars,
        }
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(3, 600)
    }
}

impl ChapterSummarizer for ExtractiveSummarizer {
    fn summarize(&self, title: &str, text: &str) -> Result<ChapterDigest> {
        let sentences: Vec<&str> = sentences(text)
            // Headings repeat the title and say nothing.
            .filter(|s| !s.trim_start_matches('#').trim().eq_ignore_ascii_case(title))
            .collect();

        let mut summary = String::new();
        for sentence in sentences.iter().take(self.max_sentences) {
            if !summary.is_empty() && summary.len() + sentence.len() + 1 > self.max_chars {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
        }
        summary = bounded_snippet(&summary, self.max_chars);
        if summary.is_empty() {
            summary = format!("{} contains no extractable text.", title);
        }

        let mut questions = vec![format!("What is covered in \"{}\"?", title)];
        let title_words: Vec<String> = title
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .collect();
        if let Some(topic) = keywords(text, 8)
            .into_iter()
            .find(|w| !title_words.contains(w))
        {
            questions.push(format!("What does \"{}\" say about {}?", title, topic));
        }

        Ok(ChapterDigest { summary, questions })
    }
}

/// Trimmed sentences of `text` that contain at least one word character.
fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(|c: char| matches!(c, '.' | '!' | '?' | '\n' | '。'))
        .map(str::trim)
        .filter(|s| s.chars().any(char::is_alphanumeric))
}
