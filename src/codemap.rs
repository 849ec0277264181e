//! Ordered file maps and fenced code-block parsing.
//!
//! Generator responses carry a project tree as a sequence of fenced blocks,
//! each headed by a relative path token:
//!
//! ````text
//! ```src/app.py
//! print("hello")
//! ```
//! ```src/data/
//! ```
//! ````
//!
//! A path ending in `/` marks an empty directory. `parse_code_blocks` turns
//! such a response into a [`FileMap`]; [`FileMap::merge`] overlays an
//! improvement pass onto a previous map without dropping untouched files.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

/// One parsed fenced block: a relative path and its content. `None`
/// content marks an empty-directory entry (path ends in `/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub path: String,
    pub content: Option<String>,
}

/// Ordered mapping from relative path to optional file content.
///
/// Keys are unique and insertion order is preserved. The map is never
/// mutated in place after construction: combining two maps goes through
/// [`FileMap::merge`], which copies and overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMap {
    entries: IndexMap<String, Option<String>>,
}

impl FileMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Content for `path`: `None` if absent, `Some(None)` for a directory
    /// marker, `Some(Some(text))` for a file.
    pub fn get(&self, path: &str) -> Option<Option<&str>> {
        self.entries.get(path).map(|c| c.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_deref()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Overlay `newer` onto this map: changed and added keys take the new
    /// content, all other keys are retained. Order is the original key
    /// order, with keys new in `newer` appended after it.
    pub fn merge(&self, newer: &FileMap) -> FileMap {
        let mut merged = self.entries.clone();
        for (path, content) in &newer.entries {
            merged.insert(path.clone(), content.clone());
        }
        FileMap { entries: merged }
    }

    /// Render the map back into the fenced-block wire format, one block per
    /// entry in map order. Parsing the result recovers an equal map.
    pub fn to_fenced(&self) -> String {
        let mut out = String::new();
        for (path, content) in &self.entries {
            out.push_str("```");
            out.push_str(path);
            out.push('\n');
            if let Some(text) = content {
                out.push_str(text);
                if !text.is_empty() {
                    out.push('\n');
                }
            }
            out.push_str("```\n");
        }
        out
    }
}

impl FromIterator<(String, Option<String>)> for FileMap {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        FileMap {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Parse free-form generator output into a [`FileMap`].
///
/// A block opens at a line of the form ```` ```<path> ```` where `<path>`
/// consists of letters, digits, `.`, `/`, `\`, `-`, `_`, optionally ending
/// in `/` for a directory marker. The scanner tracks fence depth: a fenced
/// example embedded in a body (its own opener plus a balanced bare closer)
/// stays inside the enclosing block instead of terminating it early. An
/// UNBALANCED bare ``` inside generated content still closes the block at
/// that point — a known limitation of the wire format, not silently fixed
/// by guessing intent.
///
/// File content is the fence body trimmed of leading and trailing
/// whitespace. Returns [`ParseError`] when no blocks are found.
pub fn parse_code_blocks(response: &str) -> Result<FileMap, ParseError> {
    let mut entries: IndexMap<String, Option<String>> = IndexMap::new();
    let mut lines = response.lines();

    while let Some(line) = lines.next() {
        let Some(path) = fence_path(line) else {
            continue;
        };

        let mut depth = 1usize;
        let mut closed = false;
        let mut body: Vec<&str> = Vec::new();
        for line in lines.by_ref() {
            let trimmed = line.trim_end();
            if let Some(rest) = trimmed.strip_prefix("```") {
                if rest.is_empty() {
                    depth -= 1;
                    if depth == 0 {
                        closed = true;
                        break;
                    }
                } else {
                    depth += 1;
                }
            }
            body.push(line);
        }

        // An unterminated trailing fence is dropped, matching the wire
        // format's closing-fence requirement.
        if !closed {
            break;
        }

        let content = if path.ends_with('/') {
            None
        } else {
            Some(body.join("\n").trim().to_string())
        };
        entries.insert(path.to_string(), content);
    }

    if entries.is_empty() {
        return Err(ParseError);
    }
    Ok(FileMap { entries })
}

/// The path token opening a fence, if `line` is an opener.
fn fence_path(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix("```")?;
    if rest.is_empty() {
        return None;
    }
    let valid = rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '\\' | '-' | '_'));
    valid.then_some(rest)
}
