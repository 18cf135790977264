//! Boundary-aware overlapping text chunker.
//!
//! Splits extracted document text into chunks of at most `max_size` bytes,
//! preferring sentence boundaries, then word boundaries, then a hard cut.
//! Consecutive chunks overlap by `overlap` bytes so retrieval does not lose
//! meaning at the seams. Every cut point lands on a UTF-8 character
//! boundary, and the cursor strictly advances every iteration even on
//! degenerate input with no spaces or punctuation at all.

use crate::config::ChunkingConfig;
use crate::models::{Section, TextChunk};

/// Move `idx` back to the nearest char boundary at or before it.
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Move `idx` forward to the nearest char boundary at or after it.
fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Last position in `[start, limit)` just past a sentence terminator
/// (`.`, `!`, `?`) that is followed by whitespace or the end of the text.
fn last_sentence_end(text: &str, start: usize, limit: usize) -> Option<usize> {
    let window = &text[start..limit];
    let mut best = None;
    for (i, c) in window.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let cut = start + i + c.len_utf8();
        let followed_ok = cut == text.len()
            || text[cut..]
                .chars()
                .next()
                .map(|n| n.is_whitespace())
                .unwrap_or(true);
        if followed_ok && cut <= limit {
            best = Some(cut);
        }
    }
    best
}

/// Split `text` into bounded, overlapping chunks with no heading context.
///
/// Input is trimmed first. Empty input yields no chunks; input that fits
/// within `max_size` (including anything under `min_size`) yields a single
/// chunk. Each returned chunk is right-trimmed and at most `max_size`
/// bytes long.
pub fn chunk_text(text: &str, cfg: &ChunkingConfig) -> Vec<TextChunk> {
    chunk_with_heading(text, cfg, None, 0)
}

fn chunk_with_heading(
    text: &str,
    cfg: &ChunkingConfig,
    heading: Option<&str>,
    first_index: usize,
) -> Vec<TextChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut index = first_index;

    if text.len() <= cfg.max_size || text.len() <= cfg.min_size {
        chunks.push(TextChunk {
            content: text.to_string(),
            index,
            heading_context: heading.map(|h| h.to_string()),
        });
        return chunks;
    }

    let len = text.len();
    let mut start = 0usize;

    loop {
        let hard_limit = floor_char_boundary(text, (start + cfg.max_size).min(len));
        let mut end = hard_limit;

        if hard_limit < len {
            if let Some(cut) = last_sentence_end(text, start, hard_limit) {
                end = cut;
            } else if let Some(sp) = text[start..hard_limit].rfind(' ') {
                end = start + sp + 1;
            }
        }
        // Degenerate window (e.g. max_size smaller than one code point):
        // take at least one full character.
        if end <= start {
            end = ceil_char_boundary(text, start + 1).min(len);
        }

        let piece = text[start..end].trim_end();
        if !piece.is_empty() {
            chunks.push(TextChunk {
                content: piece.to_string(),
                index,
                heading_context: heading.map(|h| h.to_string()),
            });
            index += 1;
        }

        if end >= len {
            break;
        }

        // Overlap backwards, but never stall: if the overlapped start does
        // not strictly advance, jump to the chunk end instead.
        let mut next = ceil_char_boundary(text, end.saturating_sub(cfg.overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    chunks
}

/// Chunk a document section by section, tagging every chunk with its
/// section's heading path. Indices continue sequentially across sections.
///
/// Falls back to chunking `full_text` with no heading context when every
/// section body is empty (a structured extraction that found headings but
/// no usable content).
pub fn chunk_sections(sections: &[Section], full_text: &str, cfg: &ChunkingConfig) -> Vec<TextChunk> {
    if sections.iter().all(|s| s.content.trim().is_empty()) {
        return chunk_text(full_text, cfg);
    }

    let mut chunks = Vec::new();
    for section in sections {
        if section.content.trim().is_empty() {
            continue;
        }
        let produced = chunk_with_heading(
            &section.content,
            cfg,
            Some(section.heading_context.as_str()),
            chunks.len(),
        );
        chunks.extend(produced);
    }
    chunks
}
