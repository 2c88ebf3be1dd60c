//! Source detection and validation.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Kind of source the pipeline can split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// One UTF-8 text file, pages separated by form feeds
    PagedText,
    /// A directory with one text file per page
    PageDirectory,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::PagedText => write!(f, "paged text"),
            SourceKind::PageDirectory => write!(f, "page directory"),
        }
    }
}

/// Page separator used by text extractors such as `pdftotext`.
pub const PAGE_SEPARATOR: char = '\u{000C}';

/// File extensions accepted as page files.
pub const PAGE_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Detect what kind of source `path` is.
///
/// # Returns
/// * `Err(Error::FatalSplit)` if the path is missing or neither a directory
///   nor a readable, non-empty text file
///
/// # Example
/// ```no_run
/// use pagewise::detect::{detect_source, SourceKind};
///
/// let kind = detect_source("book.txt").unwrap();
/// assert_eq!(kind, SourceKind::PagedText);
/// ```
pub fn detect_source<P: AsRef<Path>>(path: P) -> Result<SourceKind> {
    let path = path.as_ref();
    let meta = fs::metadata(path)
        .map_err(|e| Error::FatalSplit(format!("{}: {}", path.display(), e)))?;

    if meta.is_dir() {
        return Ok(SourceKind::PageDirectory);
    }
    if meta.len() == 0 {
        return Err(Error::FatalSplit(format!("{} is empty", path.display())));
    }

    let head = read_head(path, 4096)?;
    if looks_binary(&head) {
        return Err(Error::FatalSplit(format!(
            "{} is not a text file",
            path.display()
        )));
    }
    Ok(SourceKind::PagedText)
}

/// Whether `path` has a page-file extension.
pub fn is_page_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| PAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check if a byte prefix looks like binary data.
pub fn looks_binary(data: &[u8]) -> bool {
    if data.contains(&0) {
        return true;
    }
    // A prefix may cut a multi-byte char; only judge the complete part.
    match std::str::from_utf8(data) {
        Ok(_) => false,
        Err(e) => e.error_len().is_some(),
    }
}

fn read_head(path: &Path, limit: usize) -> Result<Vec<u8>> {
    use std::io::Read;

    let file = fs::File::open(path)
        .map_err(|e| Error::FatalSplit(format!("{}: {}", path.display(), e)))?;
    let mut head = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}
