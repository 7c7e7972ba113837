//! Scroll history for the chat view
//!
//! Bounded list of committed lines, newest last.

use std::collections::VecDeque;

/// Maximum number of history lines kept by default
pub const HISTORY_LIMIT: usize = 1000;

/// Committed lines shown above the prompt
#[derive(Debug, Clone)]
pub struct LineHistory {
    /// All lines (newest last)
    lines: VecDeque<String>,
    /// Maximum lines
    max_lines: usize,
}

impl Default for LineHistory {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl LineHistory {
    /// Create a history keeping at most `max_lines` lines (at least one)
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
        }
    }

    /// Append a line, evicting the oldest past the limit
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// The newest `count` lines, oldest first
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &str> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).map(String::as_str)
    }

    /// Get line count
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
