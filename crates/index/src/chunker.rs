//! Text chunking with configurable size and overlap.

use crate::types::ChunkCandidate;

/// Chunking policy, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl ChunkingPolicy {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        }
    }

    fn step(&self) -> usize {
        if self.chunk_size > self.chunk_overlap {
            self.chunk_size - self.chunk_overlap
        } else {
            self.chunk_size.max(1)
        }
    }
}

impl From<&libris_core::config::ChunkingConfig> for ChunkingPolicy {
    fn from(config: &libris_core::config::ChunkingConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.min_chunk_size,
        )
    }
}

/// Chunk text into overlapping fixed-size windows.
///
/// Windows advance by `chunk_size - chunk_overlap` characters. Each window is
/// trimmed, and dropped when fewer than `min_chunk_size` characters remain.
/// Offsets refer to characters of `text`, not bytes.
pub fn chunk_text(text: &str, policy: &ChunkingPolicy) -> Vec<ChunkCandidate> {
    if text.is_empty() || policy.chunk_size == 0 {
        return vec![];
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let step = policy.step();

    let mut chunks = Vec::new();
    let mut position = 0u32;
    let mut start = 0;

    while start < total {
        let end = (start + policy.chunk_size).min(total);
        let window = &chars[start..end];

        let leading = window.iter().take_while(|c| c.is_whitespace()).count();
        let trailing = window[leading..]
            .iter()
            .rev()
            .take_while(|c| c.is_whitespace())
            .count();
        let trimmed = &window[leading..window.len() - trailing];

        if trimmed.len() >= policy.min_chunk_size && !trimmed.is_empty() {
            chunks.push(ChunkCandidate {
                position,
                start: start + leading,
                end: end - trailing,
                text: trimmed.iter().collect(),
            });
            position += 1;
        }

        if end == total {
            break;
        }
        start += step;
    }

    tracing::debug!(
        "Chunked {} characters into {} chunks (size: {}, overlap: {}, min: {})",
        total,
        chunks.len(),
        policy.chunk_size,
        policy.chunk_overlap,
        policy.min_chunk_size
    );

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(size: usize, overlap: usize, min: usize) -> ChunkingPolicy {
        ChunkingPolicy::new(size, overlap, min)
    }

    #[test]
    fn test_chunk_text_basic() {
        let text = "a".repeat(1000);
        let chunks = chunk_text(&text, &policy(200, 50, 10));

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[1].position, 1);
        assert_eq!(chunks[1].start, 150);
        assert_eq!(chunks.last().unwrap().end, 1000);
    }

    #[test]
    fn test_chunk_text_no_overlap() {
        let text = "a".repeat(300);
        let chunks = chunk_text(&text, &policy(100, 0, 1));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].start, 200);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", &policy(100, 10, 1)).is_empty());
    }

    #[test]
    fn test_chunk_text_with_overlap() {
        let text: String = ('a'..='z').cycle().take(260).collect();
        let chunks = chunk_text(&text, &policy(50, 10, 1));

        assert!(chunks.len() >= 2);
        let first_tail: String = chunks[0].text.chars().skip(40).collect();
        let second_head: String = chunks[1].text.chars().take(10).collect();
        assert_eq!(first_tail, second_head);
    }

    #[test]
    fn test_short_tail_dropped() {
        // 250 chars: windows at 0 and 200, tail of 50 is under the minimum
        let text = "b".repeat(250);
        let chunks = chunk_text(&text, &policy(200, 0, 100));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end, 200);
    }

    #[test]
    fn test_offsets_are_characters_and_trimmed() {
        let text = format!("  {}  ", "ж".repeat(20));
        let chunks = chunk_text(&text, &policy(100, 0, 5));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 2);
        assert_eq!(chunks[0].end, 22);
        assert_eq!(chunks[0].text, "ж".repeat(20));
    }

    #[test]
    fn test_whitespace_only_window_dropped() {
        let chunks = chunk_text("      ", &policy(3, 0, 0));
        assert!(chunks.is_empty());
    }
}
