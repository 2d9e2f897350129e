use regex::Regex;
use std::sync::LazyLock;

/// Visual rule separating policy sections (a long run of `=`).
static SECTION_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"={70,}").unwrap());

/// Sections shorter than this are noise (page footers, blank runs).
const MIN_SECTION_CHARS: usize = 50;

/// A titled policy section, pre-windowing.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

/// Sliding-window text chunker.
///
/// Windows prefer to break at a newline, then at a sentence boundary, at or
/// before the window edge rather than mid-word.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Splits a policy document on its explicit section rules.
    ///
    /// The first line of each section becomes its title.
    pub fn split_sections(text: &str) -> Vec<Section> {
        SECTION_RULE
            .split(text)
            .filter_map(|raw| {
                let section = raw.trim();
                if section.len() < MIN_SECTION_CHARS {
                    return None;
                }
                let title = section
                    .lines()
                    .next()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .unwrap_or("Untitled section");
                Some(Section {
                    title: truncate_chars(title, 100).to_string(),
                    body: section.to_string(),
                })
            })
            .collect()
    }

    /// Splits one section into windows of at most `chunk_size` characters
    /// with `overlap` characters carried between consecutive windows.
    pub fn split_window(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            };
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());

            if end < chars.len() {
                // Prefer a natural break point: last newline, then last ". "
                if let Some(brk) = find_break(&chars, start, end) {
                    end = brk;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }
}

fn find_break(chars: &[char], start: usize, end: usize) -> Option<usize> {
    // Last newline strictly inside the window
    if let Some(pos) = (start + 1..end).rev().find(|&i| chars[i] == '\n') {
        return Some(pos + 1);
    }
    // Last sentence boundary (". ")
    if let Some(pos) =
        (start + 1..end.saturating_sub(1)).rev().find(|&i| chars[i] == '.' && chars[i + 1] == ' ')
    {
        return Some(pos + 1);
    }
    None
}

/// Char-boundary-safe prefix, used for titles and embedder input.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
