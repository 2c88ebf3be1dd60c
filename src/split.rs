//! Splitting a source into independently processable units.
//!
//! Splitting is all-or-nothing: either every unit is produced, in order, before
//! any processing starts, or the source is rejected with
//! [`Error::FatalSplit`](crate::Error::FatalSplit).

use std::fs;
use std::path::{Path, PathBuf};

use crate::detect::{detect_source, is_page_file, SourceKind, PAGE_SEPARATOR};
use crate::error::{Error, Result};
use crate::model::{Unit, UnitSource};

/// Splits a source artifact into ordered units.
pub trait UnitSplitter: Send + Sync {
    /// Split `source` into units numbered from 1.
    fn split(&self, source: &Path, document_id: &str) -> Result<Vec<Unit>>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Splits a single text file on form feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagedTextSplitter;

impl UnitSplitter for PagedTextSplitter {
    fn split(&self, source: &Path, document_id: &str) -> Result<Vec<Unit>> {
        let bytes = fs::read(source)
            .map_err(|e| Error::FatalSplit(format!("{}: {}", source.display(), e)))?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::FatalSplit(format!("{} is not valid UTF-8: {}", source.display(), e))
        })?;

        let mut pages: Vec<&str> = text.split(PAGE_SEPARATOR).collect();
        // pdftotext ends every page with a form feed, including the last one.
        while pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::FatalSplit(format!(
                "{} contains no text",
                source.display()
            )));
        }

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, page)| {
                Unit::new(
                    i as u32 + 1,
                    document_id,
                    UnitSource::Inline {
                        text: page.to_string(),
                        origin: source.to_path_buf(),
                    },
                )
            })
            .collect())
    }

    fn name(&self) -> &str {
        "paged-text"
    }
}

/// Treats every page file in a directory as one unit.
///
/// Files are ordered by the first number in their name (`page_2.txt` before
/// `page_10.txt`), then by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySplitter;

impl UnitSplitter for DirectorySplitter {
    fn split(&self, source: &Path, document_id: &str) -> Result<Vec<Unit>> {
        let entries = fs::read_dir(source)
            .map_err(|e| Error::FatalSplit(format!("{}: {}", source.display(), e)))?;

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::FatalSplit(format!("{}: {}", source.display(), e)))?
                .path();
            if path.is_file() && is_page_file(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(Error::FatalSplit(format!(
                "{} has no page files",
                source.display()
            )));
        }

        files.sort_by(|a, b| page_sort_key(a).cmp(&page_sort_key(b)));

        for file in &files {
            let bytes = fs::read(file)
                .map_err(|e| Error::FatalSplit(format!("{}: {}", file.display(), e)))?;
            if std::str::from_utf8(&bytes).is_err() {
                return Err(Error::FatalSplit(format!(
                    "{} is not valid UTF-8",
                    file.display()
                )));
            }
        }

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(i, path)| Unit::new(i as u32 + 1, document_id, UnitSource::File { path }))
            .collect())
    }

    fn name(&self) -> &str {
        "directory"
    }
}

fn page_sort_key(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let number = name
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX);
    (number, name)
}

/// Splitter for a detected source kind.
pub fn splitter_for(kind: SourceKind) -> Box<dyn UnitSplitter> {
    match kind {
        SourceKind::PagedText => Box::new(PagedTextSplitter),
        SourceKind::PageDirectory => Box::new(DirectorySplitter),
    }
}

/// Detect the source kind and split it.
pub fn split_source<P: AsRef<Path>>(source: P, document_id: &str) -> Result<Vec<Unit>> {
    let source = source.as_ref();
    let kind = detect_source(source)?;
    let splitter = splitter_for(kind);
    let units = splitter.split(source, document_id)?;
    log::info!(
        "Split {} ({}) into {} units",
        source.display(),
        kind,
        units.len()
    );
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_text_split() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("book.txt");
        fs::write(&file, "page one\x0cpage two\x0cpage three\x0c").unwrap();

        let units = PagedTextSplitter.split(&file, "book").unwrap();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].index, 1);
        assert_eq!(units[2].read_source().unwrap(), "page three");
        assert!(units.iter().all(|u| u.document_id == "book"));
    }

    #[test]
    fn test_paged_text_without_separator_is_one_unit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        fs::write(&file, "just one page").unwrap();
        assert_eq!(PagedTextSplitter.split(&file, "note").unwrap().len(), 1);
    }

    #[test]
    fn test_paged_text_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.txt");
        fs::write(&file, [b'o', b'k', 0xC3, 0x28]).unwrap();
        assert!(matches!(
            PagedTextSplitter.split(&file, "bad"),
            Err(Error::FatalSplit(_))
        ));
    }

    #[test]
    fn test_paged_text_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blank.txt");
        fs::write(&file, "  \x0c \n\x0c").unwrap();
        assert!(PagedTextSplitter.split(&file, "blank").is_err());
    }

    #[test]
    fn test_directory_split_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 1] {
            fs::write(dir.path().join(format!("page_{}.txt", n)), format!("p{}", n)).unwrap();
        }
        fs::write(dir.path().join("cover.png"), [0u8, 1, 2]).unwrap();

        let units = DirectorySplitter.split(dir.path(), "d").unwrap();
        let texts: Vec<String> = units.iter().map(|u| u.read_source().unwrap()).collect();
        assert_eq!(texts, vec!["p1", "p2", "p10"]);
    }

    #[test]
    fn test_directory_split_fails_fast_on_bad_page() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1.txt"), "fine").unwrap();
        fs::write(dir.path().join("2.txt"), [0xFFu8, 0xFE]).unwrap();
        assert!(matches!(
            DirectorySplitter.split(dir.path(), "d"),
            Err(Error::FatalSplit(_))
        ));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            split_source(dir.path(), "d"),
            Err(Error::FatalSplit(_))
        ));
    }
}
