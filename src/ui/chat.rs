//! Echo chat application
//!
//! The UI served to each browser: a scroll history filling the screen and a
//! prompt on the bottom row. A committed line is echoed back as the
//! assistant's reply.
//!
//! ```text
//! User: hello
//! Assistant: hello
//!
//! > typing here_
//! ```
//!
//! Layout is computed from the device size when an instance is mounted.
//! [`ChatState`] lives in the session, so history and the half-typed line
//! survive the remount that follows a browser resize.

use std::cell::RefCell;
use std::io::{self, BufWriter, Write};
use std::rc::Rc;

use crossterm::{
    cursor::{MoveTo, Show},
    queue,
    style::{Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use tracing::debug;
use unicode_width::UnicodeWidthChar;

use crate::config::{AppConfig, Color};
use crate::core::{Dimensions, LocalTask, PseudoTerminal, TerminalApp};
use super::history::LineHistory;
use super::keys::{Key, KeyCode, KeyDecoder, Modifiers};

const PROMPT: &str = "> ";

/// Per-session chat state
#[derive(Debug)]
pub struct ChatState {
    history: LineHistory,
    buffer: String,
    decoder: KeyDecoder,
}

impl ChatState {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history: LineHistory::new(history_limit),
            buffer: String::new(),
            decoder: KeyDecoder::new(),
        }
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &LineHistory {
        &self.history
    }

    /// The line being typed
    #[allow(dead_code)]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Apply raw input bytes. Returns true if anything visible changed.
    pub fn handle_input(&mut self, bytes: &[u8]) -> bool {
        let keys = self.decoder.feed(bytes);
        let mut changed = false;
        for key in keys {
            changed |= self.handle_key(key);
        }
        changed
    }

    /// Apply one key press. Returns true if anything visible changed.
    pub fn handle_key(&mut self, key: Key) -> bool {
        match key.code {
            KeyCode::Enter => {
                if self.buffer.is_empty() {
                    return false;
                }
                let line = std::mem::take(&mut self.buffer);
                self.history.push(format!("User: {}", line));
                self.history.push(format!("Assistant: {}", line));
                true
            }
            KeyCode::Backspace | KeyCode::Delete => self.buffer.pop().is_some(),
            KeyCode::Char(ch)
                if !key.modifiers.intersects(Modifiers::CTRL | Modifiers::ALT) =>
            {
                self.buffer.push(ch);
                true
            }
            _ => false,
        }
    }

    /// Draw the full screen for a terminal of the given size
    pub fn render<W: Write>(&self, out: &mut W, dims: Dimensions, prompt_color: Color) -> io::Result<()> {
        let width = usize::from(dims.columns);
        let history_rows = dims.rows.saturating_sub(1);

        let visible: Vec<&str> = self.history.tail(usize::from(history_rows)).collect();
        for row in 0..history_rows {
            queue!(out, MoveTo(0, row), Clear(ClearType::CurrentLine))?;
            if let Some(line) = visible.get(usize::from(row)) {
                queue!(out, Print(truncate_to_width(line, width)))?;
            }
        }

        // Keep the end of a long line visible, like a shell prompt
        let prompt_width = PROMPT.len().min(width);
        let input = tail_to_width(&self.buffer, width.saturating_sub(prompt_width + 1));
        queue!(
            out,
            MoveTo(0, dims.rows - 1),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(prompt_color.to_crossterm()),
            Print(&PROMPT[..prompt_width]),
            Print(input),
            ResetColor,
            Show,
        )?;
        out.flush()
    }
}

/// Longest prefix of `text` fitting in `width` columns
fn truncate_to_width(text: &str, width: usize) -> &str {
    let mut used = 0;
    for (idx, ch) in text.char_indices() {
        used += ch.width().unwrap_or(0);
        if used > width {
            return &text[..idx];
        }
    }
    text
}

/// Longest suffix of `text` fitting in `width` columns
fn tail_to_width(text: &str, width: usize) -> &str {
    let mut used = 0;
    for (idx, ch) in text.char_indices().rev() {
        used += ch.width().unwrap_or(0);
        if used > width {
            return &text[idx + ch.len_utf8()..];
        }
    }
    text
}

/// The chat application, mounted once per session and again on every resize
#[derive(Debug, Clone, Default)]
pub struct ChatApp {
    config: AppConfig,
}

impl ChatApp {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

impl TerminalApp for ChatApp {
    type State = ChatState;
    type Instance = LocalTask;

    fn new_state(&self) -> ChatState {
        ChatState::new(self.config.history_limit)
    }

    fn mount(&self, tty: PseudoTerminal, state: Rc<RefCell<ChatState>>) -> LocalTask {
        let color = self.config.prompt_color;
        LocalTask::spawn(async move {
            // Standard terminal setup; the device accepts and ignores it
            tty.set_raw_mode(true);
            tty.ref_loop();

            let dims = tty.dimensions();
            debug!(
                terminal = tty.is_terminal(),
                "chat mounted at {}x{}",
                tty.columns(),
                tty.rows()
            );
            draw(&tty, &state.borrow(), dims, color);

            while let Some(chunk) = tty.read().await {
                let mut changed = state.borrow_mut().handle_input(&chunk);
                // Batch everything already queued into one redraw
                while let Some(chunk) = tty.try_read() {
                    changed |= state.borrow_mut().handle_input(&chunk);
                }
                if changed {
                    draw(&tty, &state.borrow(), dims, color);
                }
            }
            tty.unref_loop();
            debug!("chat input closed");
        })
    }
}

fn draw(tty: &PseudoTerminal, state: &ChatState, dims: Dimensions, color: Color) {
    let mut out = BufWriter::new(tty.clone());
    if let Err(e) = state.render(&mut out, dims, color) {
        debug!("render failed: {}", e);
    }
}
