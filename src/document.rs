//! Source document intake and implementation-section extraction.
//!
//! Downstream generation quality depends on having concrete methodology
//! text, so a document with none of the recognized headings is a hard stop
//! (`NoImplementationContent`), not a degraded fallback.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::PipelineError;

/// Heading keywords that mark implementation-relevant passages.
pub const HEADING_KEYWORDS: [&str; 7] = [
    "Implementation",
    "Methodology",
    "Algorithm",
    "Methods",
    "System Design",
    "Architecture",
    "Experimental Setup",
];

/// Sections shorter than this are discarded as noise (a bare heading, a
/// table-of-contents entry).
const MIN_SECTION_CHARS: usize = 50;

static HEADING_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    HEADING_KEYWORDS
        .iter()
        .map(|kw| {
            let pattern = format!("(?i){}", regex::escape(kw));
            (*kw, Regex::new(&pattern).expect("heading keyword is a valid regex literal"))
        })
        .collect()
});

/// One extracted implementation section: the heading keyword that matched
/// and the captured text (heading line included, trimmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub text: String,
}

/// A source document: the raw extracted text plus its deduplicated,
/// order-preserving implementation sections. Created once per request,
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    raw: String,
    sections: Vec<Section>,
}

impl SourceDocument {
    /// Build a document from already-extracted text. Fails with
    /// `NoImplementationContent` when no recognized section survives
    /// extraction.
    pub fn from_text(raw: String) -> Result<Self, PipelineError> {
        let sections = extract_implementation_sections(&raw);
        if sections.is_empty() {
            return Err(PipelineError::NoImplementationContent);
        }
        Ok(Self { raw, sections })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The surviving sections joined with a blank-line separator, in
    /// extraction order.
    pub fn implementation_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Locate each heading keyword case-insensitively and capture from the
/// keyword through the end of its line plus all following text up to the
/// first blank line or end of input. Captures under 50 characters are
/// discarded; exact-text duplicates keep their first occurrence.
pub fn extract_implementation_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for (keyword, pattern) in HEADING_PATTERNS.iter() {
        for m in pattern.find_iter(content) {
            let text = capture_section(&content[m.start()..]).trim();
            if text.chars().count() < MIN_SECTION_CHARS {
                continue;
            }
            if seen.insert(text) {
                sections.push(Section {
                    heading: (*keyword).to_string(),
                    text: text.to_string(),
                });
            }
        }
    }

    sections
}

/// The heading line and following lines of `tail`, up to (not including)
/// the first blank line.
fn capture_section(tail: &str) -> &str {
    let mut end = 0;
    for line in tail.split_inclusive('\n') {
        if end > 0 && line.trim().is_empty() {
            break;
        }
        end += line.len();
    }
    &tail[..end]
}

/// Read a document file as UTF-8 text. Byte-to-text extraction for binary
/// formats happens outside the core; this intake only validates that the
/// file exists, decodes as UTF-8, and is non-empty.
pub fn read_document(path: &Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::DocumentFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let text = String::from_utf8(bytes).map_err(|_| PipelineError::DocumentFormat {
        path: path.to_path_buf(),
        reason: "not valid UTF-8 text".to_string(),
    })?;

    if text.trim().is_empty() {
        return Err(PipelineError::DocumentFormat {
            path: path.to_path_buf(),
            reason: "document is empty".to_string(),
        });
    }

    Ok(text)
}
