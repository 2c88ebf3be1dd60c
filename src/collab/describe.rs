//! Default media describer.

use std::fs;
use std::path::Path;

use regex::Regex;

use super::{keywords, MediaDescriber};
use crate::error::{Error, Result};
use crate::model::{bounded_snippet, ElementKind, MediaDescription, SubElement};

/// Describes tables by their shape and header, images by their alt text and
/// the words around them.
pub struct ContextDescriber {
    image_ref: Regex,
}

impl ContextDescriber {
    /// Create a describer.
    pub fn new() -> Self {
        Self {
            image_ref: Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"),
        }
    }

    fn describe_table(&self, table: &str, context: &str) -> Result<MediaDescription> {
        let rows: Vec<Vec<String>> = table
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('|'))
            .filter(|line| !line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ')))
            .map(split_row)
            .collect();
        let Some(header) = rows.first() else {
            return Err(Error::MalformedInput("table has no rows".into()));
        };

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
        let body_rows = rows.len() - 1;
        let named: Vec<&str> = header
            .iter()
            .map(String::as_str)
            .filter(|h| !h.is_empty())
            .collect();

        let mut summary = format!(
            "Table with {} row{} and {} column{}",
            body_rows,
            plural(body_rows),
            columns,
            plural(columns)
        );
        if !named.is_empty() {
            summary.push_str(&format!(": {}", named.join(", ")));
        }
        summary.push('.');

        let mut words: Vec<String> = named.iter().map(|h| h.to_lowercase()).collect();
        for word in keywords(context, 5) {
            if !words.contains(&word) {
                words.push(word);
            }
        }
        words.truncate(8);

        Ok(MediaDescription {
            summary,
            keywords: words,
            caption: caption_line(context),
        })
    }

    fn describe_image(&self, element: &SubElement, context: &str) -> MediaDescription {
        let alt = self
            .image_ref
            .captures(&element.context_snippet)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|alt| !alt.is_empty());

        let surrounding = self.image_ref.replace_all(context, " ");
        let words: Vec<&str> = surrounding.split_whitespace().collect();
        let nearby = bounded_snippet(&words.join(" "), 80);

        let summary = match (&alt, nearby.is_empty()) {
            (Some(alt), true) => format!("Image: {}.", alt),
            (Some(alt), false) => format!("Image: {}. Appears near \"{}\".", alt, nearby),
            (None, false) => format!("Image appearing near \"{}\".", nearby),
            (None, true) => "Image without surrounding text.".to_string(),
        };

        let mut words = alt.as_deref().map(|a| keywords(a, 3)).unwrap_or_default();
        for word in keywords(&surrounding, 5) {
            if !words.contains(&word) {
                words.push(word);
            }
        }

        MediaDescription {
            summary,
            keywords: words,
            caption: alt,
        }
    }
}

impl Default for ContextDescriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDescriber for ContextDescriber {
    fn describe(
        &self,
        payload: Option<&Path>,
        element: &SubElement,
        context: &str,
    ) -> Result<MediaDescription> {
        match element.kind {
            ElementKind::Table => {
                let table = match (payload, element.inline_content()) {
                    (Some(path), _) => fs::read_to_string(path)?,
                    (None, Some(inline)) => inline.to_string(),
                    (None, None) => {
                        return Err(Error::MalformedInput(format!(
                            "table {} has no content",
                            element.content_id
                        )))
                    }
                };
                self.describe_table(&table, context)
            }
            ElementKind::Image => Ok(self.describe_image(element, context)),
            ElementKind::Text => Err(Error::MalformedInput(format!(
                "{} is a text element",
                element.content_id
            ))),
        }
    }
}

fn split_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// A "Table 3: ..." style caption in the context, if any.
fn caption_line(context: &str) -> Option<String> {
    context
        .lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_lowercase();
            lower.starts_with("table ") || lower.starts_with("figure ")
        })
        .map(|line| bounded_snippet(line, 120))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;

    fn table(content: &str) -> SubElement {
        SubElement::new("t", "doc", 1, ElementKind::Table, Payload::Inline(content.into()))
    }

    #[test]
    fn test_describe_inline_table() {
        let element = table("| Year | Revenue |\n|---|---|\n| 2023 | 10 |\n| 2024 | 12 |");
        let description = ContextDescriber::new()
            .describe(None, &element, "Table 2: Revenue by year\nsome text")
            .unwrap();
        assert_eq!(
            description.summary,
            "Table with 2 rows and 2 columns: Year, Revenue."
        );
        assert_eq!(description.keywords[0], "year");
        assert_eq!(description.caption.as_deref(), Some("Table 2: Revenue by year"));
    }

    #[test]
    fn test_describe_table_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.md");
        fs::write(&path, "| a |\n|---|\n| 1 |").unwrap();
        let element =
            SubElement::new("t", "doc", 1, ElementKind::Table, Payload::Path("t.md".into()));
        let description = ContextDescriber::new()
            .describe(Some(&path), &element, "")
            .unwrap();
        assert!(description.summary.starts_with("Table with 1 row and 1 column"));
    }

    #[test]
    fn test_describe_image_uses_alt_text() {
        let element =
            SubElement::new("i", "doc", 1, ElementKind::Image, Payload::Inline("m.png".into()))
                .with_context("The harbour at dawn ![Harbour map](m.png) shows the docks.");
        let description = ContextDescriber::new()
            .describe(None, &element, &element.context_snippet.clone())
            .unwrap();
        assert_eq!(description.caption.as_deref(), Some("Harbour map"));
        assert!(description.summary.starts_with("Image: Harbour map."));
        assert!(description.keywords.contains(&"harbour".to_string()));
    }

    #[test]
    fn test_text_elements_rejected() {
        let element =
            SubElement::new("x", "doc", 1, ElementKind::Text, Payload::Inline("x".into()));
        assert!(ContextDescriber::new().describe(None, &element, "").is_err());
    }
}
