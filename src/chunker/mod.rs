
use std::collections::HashSet;
use tracing::debug;

/// Split raw text into bounded, overlapping chunks.
///
/// Whole lines are accumulated until adding the next line would exceed
/// `max_size` bytes, then the chunk is flushed. Each subsequent chunk is
/// prefixed with the last `overlap` bytes of its predecessor so answers
/// spanning a chunk boundary stay retrievable. Lines wider than the budget
/// are hard-split on char boundaries as a fallback.
///
/// Identical chunks (repeated headers, boilerplate) are emitted once.
/// Whitespace-only input yields no chunks.
#[inline]
pub fn chunk_text(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Invariant from config validation; clamp anyway so a bad call cannot
    // produce an unbounded chunk.
    let overlap = overlap.min(max_size.saturating_sub(1));
    let line_budget = max_size.saturating_sub(overlap).max(1);

    let mut chunks: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = String::new();
    let mut carry = String::new();

    for line in text.split_inclusive('\n') {
        for piece in split_oversized_line(line, line_budget) {
            if carry.len() + current.len() + piece.len() > max_size && !current.is_empty() {
                flush_chunk(&mut chunks, &mut seen, &mut current, &mut carry, overlap);
            }
            current.push_str(piece);
        }
    }

    if !current.is_empty() {
        flush_chunk(&mut chunks, &mut seen, &mut current, &mut carry, overlap);
    }

    debug!(
        "Chunked {} bytes of text into {} chunks (max {}, overlap {})",
        text.len(),
        chunks.len(),
        max_size,
        overlap
    );

    chunks
}

fn flush_chunk(
    chunks: &mut Vec<String>,
    seen: &mut HashSet<String>,
    current: &mut String,
    carry: &mut String,
    overlap: usize,
) {
    let mut chunk = String::with_capacity(carry.len() + current.len());
    chunk.push_str(carry);
    chunk.push_str(current);
    current.clear();

    // The carry advances even when the chunk itself is suppressed, so the
    // next chunk still overlaps its true predecessor in the source text.
    *carry = overlap_tail(&chunk, overlap);

    if chunk.trim().is_empty() {
        return;
    }
    if seen.insert(chunk.clone()) {
        chunks.push(chunk);
    }
}

/// Last `overlap` bytes of `chunk`, adjusted forward to a char boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    if chunk.len() <= overlap {
        return chunk.to_string();
    }

    let mut start = chunk.len() - overlap;
    while !chunk.is_char_boundary(start) {
        start += 1;
    }
    chunk.get(start..).unwrap_or_default().to_string()
}

/// Split a single line into pieces no wider than `budget` bytes, on char
/// boundaries. Lines already within budget come back whole.
fn split_oversized_line(line: &str, budget: usize) -> Vec<&str> {
    if line.len() <= budget {
        return vec![line];
    }

    let mut pieces = Vec::new();
    let mut rest = line;
    while rest.len() > budget {
        let mut end = budget;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // A single char wider than the budget; take it whole.
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}
