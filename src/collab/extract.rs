//! Default per-unit extractor for text pages.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::Result;
use crate::model::{
    context_window, is_confined, ElementIds, ElementKind, Payload, SubElement, Unit,
    UnitOutput, CONTEXT_SNIPPET_MAX,
};
use crate::pool::{CommandSpec, UnitWorker};

/// Extracts page text plus the images and tables referenced in it.
///
/// Markdown image references (`![alt](file.png)`) become image elements; the
/// file is copied into the unit working directory when it can be found next
/// to the source. Pipe tables become table elements rendered to
/// `{content_id}.md` in the working directory.
pub struct PlainTextExtractor {
    image_ref: Regex,
    command: Option<CommandSpec>,
}

impl PlainTextExtractor {
    /// Create an in-process extractor.
    pub fn new() -> Self {
        Self {
            image_ref: Regex::new(r#"!\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#)
                .expect("valid regex"),
            command: None,
        }
    }

    /// Make the extractor usable in process mode by running `command` per unit.
    ///
    /// The child is expected to call [`serve_stdio`](crate::pool::serve_stdio)
    /// with an in-process extractor.
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }

    /// Extract from page `text` belonging to `unit`.
    pub fn extract(&self, unit: &Unit, text: &str) -> Result<UnitOutput> {
        let mut ids = unit.ids();
        let mut elements = Vec::new();

        for caps in self.image_ref.captures_iter(text) {
            let (Some(whole), Some(target)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let id = ids.next_for(ElementKind::Image);
            let payload = self.stage_image(unit, &id, target.as_str());
            let context = context_window(text, whole.start(), whole.end(), CONTEXT_SNIPPET_MAX);
            elements.push(
                SubElement::new(id, &unit.document_id, unit.index, ElementKind::Image, payload)
                    .with_context(&context),
            );
        }

        for block in find_tables(text) {
            elements.push(self.table_element(unit, &mut ids, text, block)?);
        }

        Ok(UnitOutput {
            raw_content: text.to_string(),
            sub_elements: elements,
        })
    }

    fn stage_image(&self, unit: &Unit, id: &str, target: &str) -> Payload {
        if !is_confined(Path::new(target)) {
            log::debug!("Not copying image outside the source directory: {}", target);
            return Payload::Inline(target.to_string());
        }
        let source = unit.origin_dir().join(target);
        if unit.workdir.as_os_str().is_empty() || !source.is_file() {
            return Payload::Inline(target.to_string());
        }

        let file_name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", id, ext),
            None => id.to_string(),
        };
        match fs::copy(&source, unit.workdir.join(&file_name)) {
            Ok(_) => Payload::Path(PathBuf::from(file_name)),
            Err(e) => {
                log::debug!("Cannot copy {}: {}", source.display(), e);
                Payload::Inline(target.to_string())
            }
        }
    }

    fn table_element(
        &self,
        unit: &Unit,
        ids: &mut ElementIds,
        text: &str,
        block: TableBlock,
    ) -> Result<SubElement> {
        let id = ids.next_for(ElementKind::Table);
        let table = &text[block.start..block.end];

        let payload = if unit.workdir.as_os_str().is_empty() {
            Payload::Inline(table.to_string())
        } else {
            let file_name = format!("{}.md", id);
            fs::write(unit.workdir.join(&file_name), table)?;
            Payload::Path(PathBuf::from(file_name))
        };

        // Context is what surrounds the table, not the table itself.
        let before = context_window(text, block.start, block.start, CONTEXT_SNIPPET_MAX / 2);
        let after = context_window(text, block.end, block.end, CONTEXT_SNIPPET_MAX / 2);
        let context = format!("{}\n{}", before, after);

        Ok(
            SubElement::new(id, &unit.document_id, unit.index, ElementKind::Table, payload)
                .with_context(&context),
        )
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitWorker for PlainTextExtractor {
    fn process(&self, unit: &Unit) -> Result<UnitOutput> {
        let text = unit.read_source()?;
        self.extract(unit, &text)
    }

    fn command(&self) -> Option<CommandSpec> {
        self.command.clone()
    }
}

/// Byte range of a pipe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableBlock {
    start: usize,
    end: usize,
}

/// Runs of at least two `|` lines that include a `|---|` separator row.
fn find_tables(text: &str) -> Vec<TableBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(usize, usize, usize, bool)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let trimmed = line.trim();

        if trimmed.starts_with('|') {
            let end = start + line.trim_end().len();
            let entry = current.get_or_insert((start, end, 0, false));
            entry.1 = end;
            entry.2 += 1;
            entry.3 |= is_separator_row(trimmed);
        } else if let Some(block) = current.take() {
            push_table(&mut blocks, block);
        }
    }
    if let Some(block) = current {
        push_table(&mut blocks, block);
    }
    blocks
}

fn push_table(
    blocks: &mut Vec<TableBlock>,
    (start, end, rows, separated): (usize, usize, usize, bool),
) {
    if rows >= 2 && separated {
        blocks.push(TableBlock { start, end });
    }
}

fn is_separator_row(line: &str) -> bool {
    line.contains('-')
        && line
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitSource;
    use std::path::Path;

    fn unit_for(text: &str, origin: &Path) -> Unit {
        Unit::new(
            2,
            "doc",
            UnitSource::Inline {
                text: text.to_string(),
                origin: origin.to_path_buf(),
            },
        )
    }

    #[test]
    fn test_find_tables() {
        let text = "Intro\n| a | b |\n|---|---|\n| 1 | 2 |\nAfter\n| not | a table |\n";
        let blocks = find_tables(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            &text[blocks[0].start..blocks[0].end],
            "| a | b |\n|---|---|\n| 1 | 2 |"
        );
    }

    #[test]
    fn test_inline_payloads_without_workdir() {
        let text =
            "Chapter Two intro text\n![A storm](storm.png)\n\n| x | y |\n|---|---|\n| 1 | 2 |\n";
        let unit = unit_for(text, Path::new("/nowhere/doc.txt"));
        let output = PlainTextExtractor::new().process(&unit).unwrap();

        assert_eq!(output.raw_content, text);
        assert_eq!(output.sub_elements.len(), 2);
        let image = &output.sub_elements[0];
        assert_eq!(image.content_id, "doc-u0002-img001");
        assert_eq!(image.payload, Payload::Inline("storm.png".into()));
        assert!(image.context_snippet.contains("Chapter Two intro"));

        let table = &output.sub_elements[1];
        assert_eq!(table.kind, ElementKind::Table);
        assert_eq!(table.content_id, "doc-u0002-tbl002");
        assert!(table.inline_content().unwrap().starts_with("| x | y |"));
    }

    #[test]
    fn test_files_written_to_workdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fig.png"), [1u8, 2, 3]).unwrap();
        let text = "See ![figure](fig.png)\n| h |\n|---|\n| v |";
        let unit =
            unit_for(text, &dir.path().join("doc.txt")).with_workdir(&dir.path().join("out"));
        fs::create_dir_all(&unit.workdir).unwrap();

        let output = PlainTextExtractor::new().process(&unit).unwrap();
        let image = &output.sub_elements[0];
        assert_eq!(image.payload, Payload::Path("doc-u0002-img001.png".into()));
        assert!(unit.workdir.join("doc-u0002-img001.png").is_file());

        let table = &output.sub_elements[1];
        let path = table.payload.resolve(&unit.workdir).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "| h |\n|---|\n| v |");
    }

    #[test]
    fn test_images_outside_source_dir_not_copied() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages");
        fs::create_dir_all(&pages).unwrap();
        fs::write(dir.path().join("private.png"), [9u8]).unwrap();
        let text = "![a](../private.png) ![b](/etc/hostname)";
        let unit = unit_for(text, &pages.join("doc.txt")).with_workdir(&dir.path().join("out"));
        fs::create_dir_all(&unit.workdir).unwrap();

        let output = PlainTextExtractor::new().process(&unit).unwrap();
        assert_eq!(output.sub_elements[0].payload, Payload::Inline("../private.png".into()));
        assert_eq!(output.sub_elements[1].payload, Payload::Inline("/etc/hostname".into()));
        assert_eq!(fs::read_dir(&unit.workdir).unwrap().count(), 0);
    }
}
