//! Separation of reasoning deltas from answer text in streamed output.
//!
//! Thinking models wrap their reasoning in a `<think>…</think>` region.
//! [`ThinkSplitter`] is an incremental scanner over raw deltas: it survives
//! tags split across chunk boundaries and reports a missing closing
//! delimiter as an interrupted reasoning region.

use std::time::Instant;

/// A classified piece of streamed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Thinking(String),
}

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Incremental `<think>` region scanner.
#[derive(Debug, Default)]
pub struct ThinkSplitter {
    inside: bool,
    buf: String,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw delta, returning the pieces that became unambiguous.
    pub fn push(&mut self, chunk: &str) -> Vec<Piece> {
        self.buf.push_str(chunk);
        self.drain(false)
    }

    /// Flush at end of stream. The boolean is true when the stream ended
    /// inside an unterminated `<think>` region (treated as interrupted).
    pub fn finish(&mut self) -> (Vec<Piece>, bool) {
        let pieces = self.drain(true);
        (pieces, self.inside)
    }

    fn drain(&mut self, at_end: bool) -> Vec<Piece> {
        let mut out = Vec::new();
        loop {
            let tag = if self.inside { CLOSE_TAG } else { OPEN_TAG };
            if let Some(pos) = self.buf.find(tag) {
                if pos > 0 {
                    let before: String = self.buf[..pos].to_string();
                    out.push(self.classify(before));
                }
                self.buf.replace_range(..pos + tag.len(), "");
                self.inside = !self.inside;
                continue;
            }

            // No complete tag: emit everything except a suffix that could
            // still become one.
            let keep = if at_end {
                0
            } else {
                partial_tag_suffix(&self.buf, tag)
            };
            let emit_len = self.buf.len() - keep;
            if emit_len > 0 {
                let emitted: String = self.buf[..emit_len].to_string();
                self.buf.replace_range(..emit_len, "");
                out.push(self.classify(emitted));
            }
            break;
        }
        out
    }

    fn classify(&self, text: String) -> Piece {
        if self.inside {
            Piece::Thinking(text)
        } else {
            Piece::Text(text)
        }
    }
}

/// Length of the longest buffer suffix that is a proper prefix of `tag`.
fn partial_tag_suffix(buf: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(buf.len());
    for len in (1..=max).rev() {
        let start = buf.len() - len;
        if !buf.is_char_boundary(start) {
            continue;
        }
        if tag.starts_with(&buf[start..]) {
            return len;
        }
    }
    0
}

/// Lifecycle of one reasoning region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningStatus {
    #[default]
    Idle,
    Started,
    InProgress,
    Completed,
    Interrupted,
}

/// Accumulated reasoning state for a single LLM call.
#[derive(Debug)]
pub struct ReasoningState {
    pub status: ReasoningStatus,
    content: String,
    started: Option<Instant>,
    elapsed_ms: u64,
}

impl Default for ReasoningState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningState {
    pub fn new() -> Self {
        Self {
            status: ReasoningStatus::Idle,
            content: String::new(),
            started: None,
            elapsed_ms: 0,
        }
    }

    /// Record the start of a reasoning region.
    pub fn begin(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.status = ReasoningStatus::Started;
    }

    /// Append a reasoning delta.
    pub fn push(&mut self, delta: &str) {
        if self.started.is_none() {
            self.begin();
        }
        self.status = ReasoningStatus::InProgress;
        self.content.push_str(delta);
        self.elapsed_ms = self.elapsed();
    }

    pub fn complete(&mut self) {
        self.status = ReasoningStatus::Completed;
        self.elapsed_ms = self.elapsed();
    }

    pub fn interrupt(&mut self) {
        self.status = ReasoningStatus::Interrupted;
        self.elapsed_ms = self.elapsed();
    }

    fn elapsed(&self) -> u64 {
        self.started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn total_chars(&self) -> usize {
        self.content.chars().count()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Short summary of the accumulated reasoning for the completion event.
    pub fn summary(&self) -> String {
        const LIMIT: usize = 200;
        let trimmed = self.content.trim();
        if trimmed.chars().count() <= LIMIT {
            return trimmed.to_string();
        }
        let mut cut: String = trimmed.chars().take(LIMIT).collect();
        cut.push('…');
        cut
    }
}
