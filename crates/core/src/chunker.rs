//! Splits a finished bot reply into human-paced fragments.
//!
//! Short replies go out in one piece. Longer ones are packed sentence by
//! sentence into fragments of at most [`MAX_CHUNK_CHARS`] characters, never
//! flushing a fragment that is still shorter than the minimum. When sentence
//! packing cannot produce a usable split (no sentence boundaries, one giant
//! sentence) the text is packed word by word instead.

use rand::Rng;
use std::time::Duration;

use crate::delay::DelayRange;

/// Replies up to this many characters are sent as a single chunk.
pub const SINGLE_CHUNK_LIMIT: usize = 400;
/// Soft upper bound for a packed chunk.
pub const MAX_CHUNK_CHARS: usize = 500;
/// A sentence buffer is only flushed once it holds this many characters.
pub const MIN_SENTENCE_CHUNK_CHARS: usize = 150;
/// Same as [`MIN_SENTENCE_CHUNK_CHARS`] for the word-based fallback.
pub const MIN_WORD_CHUNK_CHARS: usize = 100;

/// One fragment of a reply, with the pause to wait before showing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub is_last: bool,
    pub delay: Duration,
}

/// Split `text` and attach a delay drawn from `delay` to every fragment.
///
/// Always returns at least one chunk and exactly one chunk with `is_last`.
pub fn chunk_message<R: Rng + ?Sized>(text: &str, delay: DelayRange, rng: &mut R) -> Vec<Chunk> {
    let pieces = split_message(text);
    let last = pieces.len().saturating_sub(1);
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            content,
            is_last: index == last,
            delay: delay.sample(rng),
        })
        .collect()
}

/// Deterministic part of [`chunk_message`]: the fragment texts only.
pub fn split_message(text: &str) -> Vec<String> {
    if char_len(text) <= SINGLE_CHUNK_LIMIT {
        return vec![text.to_string()];
    }

    let sentences = split_sentences(text);
    let chunks = pack(&sentences, MIN_SENTENCE_CHUNK_CHARS);
    let usable = match chunks.as_slice() {
        [] => false,
        [only] => char_len(only) <= MAX_CHUNK_CHARS,
        _ => true,
    };
    if usable {
        return chunks;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let chunks = pack(&words, MIN_WORD_CHUNK_CHARS);
    if chunks.is_empty() {
        // Nothing but whitespace.
        return vec![String::new()];
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Sentences end at `.`, `!` or `?` immediately followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_idx, next)) = chars.peek() {
            if next.is_whitespace() {
                push_trimmed(&mut out, &text[start..next_idx]);
                start = next_idx;
            }
        }
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

/// Greedy packing. A trailing remainder under [`MIN_SENTENCE_CHUNK_CHARS`] is
/// folded into the previous chunk so only a lone chunk can be short.
fn pack(pieces: &[&str], min_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(piece);
        let joined_len = if buffer.is_empty() {
            piece_len
        } else {
            buffer_len + 1 + piece_len
        };

        if joined_len > MAX_CHUNK_CHARS && buffer_len >= min_chars {
            chunks.push(std::mem::take(&mut buffer));
            buffer_len = 0;
        }

        if !buffer.is_empty() {
            buffer.push(' ');
            buffer_len += 1;
        }
        buffer.push_str(piece);
        buffer_len += piece_len;
    }

    if !buffer.is_empty() {
        match chunks.last_mut() {
            Some(prev) if buffer_len < MIN_SENTENCE_CHUNK_CHARS => {
                prev.push(' ');
                prev.push_str(&buffer);
            }
            _ => chunks.push(buffer),
        }
    }

    chunks
}
