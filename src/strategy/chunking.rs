use serde::{Deserialize, Serialize};

use crate::strategy::{Chunker, StrategyResult};

/// Splits after `.`, `!` or `?` when followed by at least one space
#[derive(Debug, Clone, Copy, Default)]
pub struct SentenceChunker;

impl Chunker for SentenceChunker {
    fn name(&self) -> String {
        "sentence".to_string()
    }

    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>> {
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let end = i + c.len_utf8();
            let mut next_start = end;
            while let Some(&(j, ' ')) = chars.peek() {
                next_start = j + 1;
                chars.next();
            }
            if next_start > end {
                push_trimmed(&mut sentences, &text[start..end]);
                start = next_start;
            }
        }
        push_trimmed(&mut sentences, &text[start..]);
        Ok(sentences)
    }
}

/// One chunk per non-blank line
#[derive(Debug, Clone, Copy, Default)]
pub struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn name(&self) -> String {
        "paragraph".to_string()
    }

    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>> {
        let mut paragraphs = Vec::new();
        // `lines` also strips a trailing '\r'
        for line in text.lines() {
            push_trimmed(&mut paragraphs, line);
        }
        Ok(paragraphs)
    }
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Chunking strategy selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingKind {
    #[default]
    Sentence,
    Paragraph,
}

/// Either shipped chunker, chosen at runtime
#[derive(Debug, Clone, Copy)]
pub enum ConfiguredChunker {
    Sentence(SentenceChunker),
    Paragraph(ParagraphChunker),
}

impl From<ChunkingKind> for ConfiguredChunker {
    fn from(kind: ChunkingKind) -> Self {
        match kind {
            ChunkingKind::Sentence => Self::Sentence(SentenceChunker),
            ChunkingKind::Paragraph => Self::Paragraph(ParagraphChunker),
        }
    }
}

impl Chunker for ConfiguredChunker {
    fn name(&self) -> String {
        match self {
            Self::Sentence(c) => c.name(),
            Self::Paragraph(c) => c.name(),
        }
    }

    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>> {
        match self {
            Self::Sentence(c) => c.chunk(text),
            Self::Paragraph(c) => c.chunk(text),
        }
    }
}
