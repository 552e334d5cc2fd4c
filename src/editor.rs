//! Targeted search/replace editor with layered fuzzy matching.
//!
//! `edit_file` never rewrites a whole file. Matching tries each layer in
//! order until one yields a unique match:
//!
//! 1. exact
//! 2. trailing whitespace trimmed / line endings normalized
//! 3. interior whitespace collapsed
//! 4. indentation-preserving (leading whitespace ignored; the replacement is
//!    re-indented to the match)
//!
//! Edits are atomic per file (temp file + rename): a crash mid-edit leaves
//! the file either unchanged or fully replaced.

use crate::errors::{EditError, MismatchDetails};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Diff summary returned after a successful edit. Never the full file.
#[derive(Debug, Clone)]
pub struct EditSummary {
    pub path: PathBuf,
    /// 1-based line where the change starts.
    pub first_changed_line: usize,
    pub lines_removed: usize,
    pub lines_added: usize,
    /// Which match layer succeeded.
    pub layer: &'static str,
}

impl EditSummary {
    /// Short human summary for tool observations.
    pub fn describe(&self) -> String {
        format!(
            "edited {} at line {}: -{} +{} lines ({} match)",
            self.path.display(),
            self.first_changed_line,
            self.lines_removed,
            self.lines_added,
            self.layer
        )
    }
}

const LAYER_NAMES: [&str; 4] = ["exact", "trailing-ws", "collapsed-ws", "indent"];

/// Apply a search/replace edit to `path`.
pub fn apply_edit(path: &Path, search: &str, replace: &str) -> Result<EditSummary, EditError> {
    if search.trim().is_empty() {
        return Err(EditError::EmptySearch {
            path: path.to_path_buf(),
        });
    }

    let original = std::fs::read_to_string(path).map_err(|source| EditError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let had_trailing_newline = original.ends_with('\n');
    let content = original.replace("\r\n", "\n");
    let lines: Vec<&str> = content.lines().collect();
    let search_lines = block_lines(search);
    let replace_lines = block_lines(replace);

    let (position, layer_index) = locate(&lines, &search_lines, path)?;

    let new_block: Vec<String> = if layer_index == 3 {
        reindent(&replace_lines, &search_lines, lines[position])
    } else {
        replace_lines.iter().map(|l| l.to_string()).collect()
    };

    let mut updated: Vec<String> = Vec::with_capacity(lines.len());
    updated.extend(lines[..position].iter().map(|l| l.to_string()));
    updated.extend(new_block.iter().cloned());
    updated.extend(lines[position + search_lines.len()..].iter().map(|l| l.to_string()));

    let mut output = updated.join("\n");
    if had_trailing_newline && !output.is_empty() {
        output.push('\n');
    }

    write_atomic(path, &output)?;

    Ok(EditSummary {
        path: path.to_path_buf(),
        first_changed_line: position + 1,
        lines_removed: search_lines.len(),
        lines_added: new_block.len(),
        layer: LAYER_NAMES[layer_index],
    })
}

fn block_lines(block: &str) -> Vec<&str> {
    if block.is_empty() {
        return Vec::new();
    }
    let trimmed = block.strip_suffix('\n').unwrap_or(block);
    trimmed.split('\n').collect()
}

/// Find the unique match position, trying layers in order. The first layer
/// that yields any match decides: exactly one hit wins, more than one is
/// ambiguous.
fn locate(
    lines: &[&str],
    search_lines: &[&str],
    path: &Path,
) -> Result<(usize, usize), EditError> {
    type Normalizer = fn(&str) -> String;
    let normalizers: [Normalizer; 4] = [
        |l| l.to_string(),
        |l| l.trim_end().to_string(),
        collapse_whitespace,
        |l| l.trim_start().trim_end().to_string(),
    ];

    if search_lines.is_empty() || lines.len() < search_lines.len() {
        return Err(mismatch(lines, search_lines, path));
    }

    for (layer_index, normalize) in normalizers.iter().enumerate() {
        let needle: Vec<String> = search_lines.iter().map(|l| normalize(l)).collect();
        let mut hits = Vec::new();
        for start in 0..=(lines.len() - search_lines.len()) {
            let window_matches = (0..search_lines.len())
                .all(|i| normalize(lines[start + i]) == needle[i]);
            if window_matches {
                hits.push(start);
            }
        }
        match hits.len() {
            0 => continue,
            1 => return Ok((hits[0], layer_index)),
            n => {
                return Err(EditError::Ambiguous {
                    path: path.to_path_buf(),
                    count: n,
                });
            }
        }
    }

    Err(mismatch(lines, search_lines, path))
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the mismatch error with the closest candidate window: the window
/// sharing the most whitespace-insensitive lines with the search block.
fn mismatch(lines: &[&str], search_lines: &[&str], path: &Path) -> EditError {
    let window = search_lines.len().max(1).min(lines.len().max(1));
    let needle: Vec<String> = search_lines.iter().map(|l| collapse_whitespace(l)).collect();

    let mut best_start = 0;
    let mut best_score = 0usize;
    if !lines.is_empty() && lines.len() >= window {
        for start in 0..=(lines.len() - window) {
            let score = (0..window)
                .filter(|&i| {
                    needle
                        .get(i)
                        .is_some_and(|n| !n.is_empty() && collapse_whitespace(lines[start + i]) == *n)
                })
                .count();
            if score > best_score {
                best_score = score;
                best_start = start;
            }
        }
    }

    let end = (best_start + window).min(lines.len());
    let candidate: String = lines[best_start..end].join("\n");
    EditError::Mismatch {
        path: path.to_path_buf(),
        details: MismatchDetails {
            candidate_line: best_start + 1,
            candidate_window: crate::util::truncate_chars(&candidate, 600),
            layers_tried: LAYER_NAMES.to_vec(),
        },
    }
}

/// Re-indent the replacement to the indentation of the matched block,
/// preserving relative depth within the replacement.
fn reindent(replace_lines: &[&str], search_lines: &[&str], matched_first: &str) -> Vec<String> {
    let actual = leading_whitespace(matched_first);
    let expected = search_lines.first().map(|l| leading_whitespace(l)).unwrap_or_default();

    replace_lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                return String::new();
            }
            let current = leading_whitespace(line);
            let body = &line[current.len()..];
            // Depth relative to the search block's first line, re-based onto
            // the match's actual indentation.
            let relative = current.strip_prefix(expected.as_str()).unwrap_or("");
            format!("{actual}{relative}{body}")
        })
        .collect()
}

fn leading_whitespace(line: &str) -> String {
    line.chars().take_while(|c| c.is_whitespace()).collect()
}

/// Temp-file-then-rename write in the target's directory.
fn write_atomic(path: &Path, content: &str) -> Result<(), EditError> {
    let io_err = |source: std::io::Error| EditError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
