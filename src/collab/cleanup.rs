//! Rule-based repair of extracted unit text.

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::TextRepairer;
use crate::error::Result;

/// Repair preset levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPreset {
    /// Unicode NFC and whitespace only
    Minimal,
    /// NFC, ligatures, hyphenation, page numbers, line merging
    #[default]
    Standard,
}

/// Which repairs to apply.
#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// Normalize Unicode to NFC form
    pub normalize_unicode: bool,

    /// Expand ligatures (ﬁ → fi)
    pub fix_ligatures: bool,

    /// Drop Private Use Area characters
    pub remove_pua: bool,

    /// Drop U+FFFD
    pub remove_replacement_char: bool,

    /// Drop lines holding nothing but a page number
    pub remove_page_numbers: bool,

    /// Join words split by a hyphen at a line break
    pub fix_hyphenation: bool,

    /// Join lines broken mid-sentence
    pub merge_broken_lines: bool,

    /// Collapse runs of spaces
    pub normalize_whitespace: bool,

    /// Maximum consecutive newlines kept (0 = unlimited)
    pub max_consecutive_newlines: u8,
}

impl RepairOptions {
    /// Options for a preset.
    pub fn from_preset(preset: RepairPreset) -> Self {
        match preset {
            RepairPreset::Minimal => Self {
                normalize_unicode: true,
                fix_ligatures: false,
                remove_pua: false,
                remove_replacement_char: false,
                remove_page_numbers: false,
                fix_hyphenation: false,
                merge_broken_lines: false,
                normalize_whitespace: true,
                max_consecutive_newlines: 0,
            },
            RepairPreset::Standard => Self {
                normalize_unicode: true,
                fix_ligatures: true,
                remove_pua: true,
                remove_replacement_char: true,
                remove_page_numbers: true,
                fix_hyphenation: true,
                merge_broken_lines: true,
                normalize_whitespace: true,
                // Paragraph breaks are what the chunker splits on.
                max_consecutive_newlines: 2,
            },
        }
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self::from_preset(RepairPreset::default())
    }
}

const LIGATURES: &[(char, &str)] = &[
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

/// Default [`TextRepairer`].
///
/// Deterministic and local; it never fails on text input.
pub struct CleanupRepairer {
    options: RepairOptions,
    page_number: Regex,
    hyphenation: Regex,
    heading_line: Regex,
    spaces: Regex,
    newlines: Option<(Regex, String)>,
}

impl CleanupRepairer {
    /// Create a repairer with the given options.
    pub fn new(options: RepairOptions) -> Self {
        let newlines = match options.max_consecutive_newlines {
            0 => None,
            max => {
                let max = max as usize;
                // At most 256 repetitions, well inside the regex size limit.
                let pattern = format!(r"\n{{{},}}", max + 1);
                let runs = Regex::new(&pattern).expect("newline run pattern is valid");
                Some((runs, "\n".repeat(max)))
            }
        };

        Self {
            page_number: Regex::new(
                r"(?m)^[ \t]*(?:[-–—][ \t]*)?(?:[Pp]age[ \t]+)?\d{1,4}(?:[ \t]*[-–—])?[ \t]*$",
            )
            .expect("valid regex"),
            hyphenation: Regex::new(r"([A-Za-z])-[ \t]*\n[ \t]*([a-z])").expect("valid regex"),
            heading_line: Regex::new(r"^(?i)(?:#{1,6}\s|(?:chapter|part|section)\s+\w+)")
                .expect("valid regex"),
            spaces: Regex::new(r"[ \t]{2,}").expect("valid regex"),
            newlines,
            options,
        }
    }

    /// Create a repairer from a preset.
    pub fn from_preset(preset: RepairPreset) -> Self {
        Self::new(RepairOptions::from_preset(preset))
    }

    /// Apply the configured repairs to `text`.
    pub fn clean(&self, text: &str) -> String {
        let mut result: String = if self.options.normalize_unicode {
            text.nfc().collect()
        } else {
            text.to_string()
        };

        if self.options.fix_ligatures
            || self.options.remove_pua
            || self.options.remove_replacement_char
        {
            result = self.fix_chars(&result);
        }

        if self.options.remove_page_numbers {
            result = self.page_number.replace_all(&result, "").into_owned();
        }
        if self.options.fix_hyphenation {
            result = self.hyphenation.replace_all(&result, "$1$2").into_owned();
        }
        if self.options.merge_broken_lines {
            result = self.merge_broken_lines(&result);
        }
        if self.options.normalize_whitespace {
            result = self.spaces.replace_all(&result, " ").into_owned();
            result = result
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
        }
        if let Some((re, replacement)) = &self.newlines {
            result = re.replace_all(&result, replacement.as_str()).into_owned();
        }

        result.trim().to_string()
    }

    fn merge_broken_lines(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            out.push_str(line);
            if let Some(next) = lines.peek() {
                out.push(if self.continues_sentence(line, next) { ' ' } else { '\n' });
            }
        }
        out
    }

    /// A line that does not end a sentence, followed by one that continues it
    /// in lower case. Headings and table rows are never joined.
    fn continues_sentence(&self, line: &str, next: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('|') || self.heading_line.is_match(line) {
            return false;
        }
        let ends_sentence = matches!(
            line.chars().last(),
            Some('.' | '!' | '?' | ':' | ';' | '。' | '！' | '？')
        );
        !ends_sentence
            && next
                .trim_start()
                .chars()
                .next()
                .is_some_and(|c| c.is_lowercase() || is_cjk(c))
    }

    fn fix_chars(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if self.options.fix_ligatures {
                if let Some((_, expanded)) = LIGATURES.iter().find(|(l, _)| *l == c) {
                    out.push_str(expanded);
                    continue;
                }
            }
            if self.options.remove_replacement_char && c == '\u{FFFD}' {
                continue;
            }
            if self.options.remove_pua && is_private_use(c) {
                continue;
            }
            out.push(c);
        }
        out
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x1100..=0x11FF | 0x3040..=0x30FF | 0x4E00..=0x9FFF | 0xAC00..=0xD7A3)
}

fn is_private_use(c: char) -> bool {
    let code = c as u32;
    (0xE000..=0xF8FF).contains(&code)
        || (0xF0000..=0xFFFFD).contains(&code)
        || (0x100000..=0x10FFFD).contains(&code)
}

impl Default for CleanupRepairer {
    fn default() -> Self {
        Self::new(RepairOptions::default())
    }
}

impl TextRepairer for CleanupRepairer {
    fn repair(&self, text: &str) -> Result<String> {
        Ok(self.clean(text))
    }
}
