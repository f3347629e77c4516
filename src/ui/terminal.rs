//! crossterm-backed terminal: the prompt-mode console and the widget the
//! remote PTY renders into. Both share stdout; only one is in front.

use std::cell::Cell;
use std::io::{self, Stdout, Write};

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::event::{DisableBracketedPaste, EnableBracketedPaste};
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{execute, queue};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthStr;

use super::display::{TerminalWidget, Viewport};
use super::prompt::PromptLine;
use crate::core::reconnect::ConnectionState;
use crate::exec::pipeline::{Outcome, Rendered};

/// Output kept while the interactive view is hidden
const PENDING_LIMIT: usize = 256 * 1024;

/// Raw mode terminals need CR before every LF
fn crlf(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// Widget for interactive mode
pub struct CrosstermWidget {
    viewport: Viewport,
    visible: bool,
    pending: Vec<u8>,
    status: Option<ConnectionState>,
}

impl CrosstermWidget {
    pub fn new() -> Self {
        let viewport = match terminal::size() {
            Ok((cols, rows)) => Viewport { rows, cols },
            Err(_) => Viewport::default(),
        };
        Self {
            viewport,
            visible: false,
            pending: Vec::new(),
            status: None,
        }
    }

    /// Show or hide the view; showing flushes output that arrived meanwhile
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if visible && !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.write(&pending);
        }
    }

    /// Last status shown
    #[cfg(test)]
    pub fn status(&self) -> Option<&ConnectionState> {
        self.status.as_ref()
    }

    fn line(&mut self, color: Color, text: &str) {
        let mut stdout = io::stdout();
        let _ = queue!(
            stdout,
            SetForegroundColor(color),
            crossterm::style::Print(format!("\r\n[{}]\r\n", text)),
            ResetColor
        );
        let _ = stdout.flush();
    }
}

impl Default for CrosstermWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalWidget for CrosstermWidget {
    fn write(&mut self, bytes: &[u8]) {
        if !self.visible {
            self.pending.extend_from_slice(bytes);
            if self.pending.len() > PENDING_LIMIT {
                // Drop whole lines so the flush never starts inside a UTF-8
                // sequence or an escape sequence
                let excess = self.pending.len() - PENDING_LIMIT;
                let cut = self.pending[excess..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(self.pending.len(), |p| excess + p + 1);
                debug!("Hidden output over limit, dropping {} bytes", cut);
                self.pending.drain(..cut);
            }
            return;
        }
        let mut stdout = io::stdout();
        if let Err(e) = stdout.write_all(bytes).and_then(|_| stdout.flush()) {
            warn!("Failed to write output: {}", e);
        }
    }

    fn clear(&mut self) {
        self.pending.clear();
        if self.visible {
            let mut stdout = io::stdout();
            let _ = execute!(
                stdout,
                Clear(ClearType::All),
                crossterm::cursor::MoveTo(0, 0)
            );
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn fit(&mut self) -> Viewport {
        if let Ok((cols, rows)) = terminal::size() {
            self.viewport = Viewport { rows, cols };
        }
        self.viewport
    }

    fn show_status(&mut self, state: &ConnectionState) {
        // An error stays up until something other than a plain disconnect
        if matches!(state, ConnectionState::Disconnected)
            && self.status.as_ref().is_some_and(ConnectionState::is_failed)
        {
            return;
        }
        self.status = Some(state.clone());
        if self.visible {
            let color = if state.is_failed() {
                Color::Red
            } else if matches!(state, ConnectionState::Live) {
                Color::Green
            } else {
                Color::DarkGrey
            };
            self.line(color, &state.to_string());
        }
    }

    fn notice(&mut self, text: &str) {
        if self.visible {
            self.line(Color::Yellow, text);
        }
    }
}

/// Screen rows of a drawn prompt: the symbol leads the first row and a run
/// of dots as wide as the symbol leads each continuation row.
#[derive(Debug, PartialEq, Eq)]
struct PromptLayout {
    rows: Vec<(String, String)>,
    cursor_row: usize,
    cursor_col: usize,
}

impl PromptLayout {
    fn new(symbol: &str, line: &PromptLine) -> Self {
        let width = UnicodeWidthStr::width(symbol);
        let continuation = ".".repeat(width);
        let rows = line
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let prefix = if i == 0 { symbol.to_string() } else { continuation.clone() };
                (prefix, body)
            })
            .collect();
        Self {
            rows,
            cursor_row: line.cursor_row(),
            cursor_col: width + 1 + line.cursor_column(),
        }
    }

    fn queue(&self, stdout: &mut Stdout) -> io::Result<()> {
        for (i, (prefix, body)) in self.rows.iter().enumerate() {
            if i > 0 {
                queue!(stdout, crossterm::style::Print("\r\n"))?;
            }
            queue!(
                stdout,
                SetForegroundColor(Color::Cyan),
                crossterm::style::Print(prefix),
                ResetColor,
                crossterm::style::Print(" "),
                crossterm::style::Print(body)
            )?;
        }
        Ok(())
    }
}

fn to_u16(n: usize) -> u16 {
    n.min(u16::MAX as usize) as u16
}

/// Prompt-mode transcript on the main screen
pub struct Console {
    initialized: bool,
    /// Row of the cursor inside the prompt currently on screen
    prompt_row: Cell<usize>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            initialized: false,
            prompt_row: Cell::new(0),
        }
    }

    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnableBracketedPaste)?;
        self.initialized = true;
        Ok(())
    }

    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            DisableBracketedPaste,
            ResetColor,
            SetAttribute(Attribute::Reset)
        );
        let _ = stdout.flush();
        terminal::disable_raw_mode()?;
        println!();
        Ok(())
    }

    /// Clear the prompt on screen and leave the cursor where it started
    fn erase_prompt(&self, stdout: &mut Stdout) -> io::Result<()> {
        let row = self.prompt_row.replace(0);
        if row > 0 {
            queue!(stdout, MoveUp(to_u16(row)))?;
        }
        queue!(stdout, MoveToColumn(0), Clear(ClearType::FromCursorDown))
    }

    /// Redraw the input in place
    pub fn draw_prompt(&self, symbol: &str, line: &PromptLine) -> io::Result<()> {
        let mut stdout = io::stdout();
        let layout = PromptLayout::new(symbol, line);
        self.erase_prompt(&mut stdout)?;
        layout.queue(&mut stdout)?;

        let below = layout.rows.len().saturating_sub(1 + layout.cursor_row);
        if below > 0 {
            queue!(stdout, MoveUp(to_u16(below)))?;
        }
        queue!(stdout, MoveToColumn(to_u16(layout.cursor_col)))?;
        self.prompt_row.set(layout.cursor_row);
        stdout.flush()
    }

    /// Freeze the submitted input into the transcript
    pub fn print_command(&self, symbol: &str, line: &PromptLine) -> io::Result<()> {
        let mut stdout = io::stdout();
        self.erase_prompt(&mut stdout)?;
        PromptLayout::new(symbol, line).queue(&mut stdout)?;
        queue!(stdout, crossterm::style::Print("\r\n"))?;
        stdout.flush()
    }

    pub fn print_result(&self, rendered: &Rendered) -> io::Result<()> {
        let mut stdout = io::stdout();
        self.erase_prompt(&mut stdout)?;
        let mut text = crlf(&rendered.text);
        if !text.ends_with("\r\n") {
            text.push_str("\r\n");
        }
        match rendered.outcome {
            Outcome::Error => queue!(stdout, SetForegroundColor(Color::Red))?,
            Outcome::Neutral => queue!(stdout, SetForegroundColor(Color::DarkGrey))?,
            Outcome::Success => {}
        }
        queue!(stdout, crossterm::style::Print(text), ResetColor)?;
        if let Some(badge) = rendered.badge() {
            queue!(
                stdout,
                SetForegroundColor(Color::Red),
                crossterm::style::Print(format!("{}\r\n", badge)),
                ResetColor
            )?;
        }
        stdout.flush()
    }

    pub fn info(&self, text: &str) -> io::Result<()> {
        self.print_line(Color::DarkGrey, text)
    }

    pub fn error(&self, text: &str) -> io::Result<()> {
        self.print_line(Color::Red, &format!("error: {}", text))
    }

    fn print_line(&self, color: Color, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout();
        self.erase_prompt(&mut stdout)?;
        queue!(
            stdout,
            SetForegroundColor(color),
            crossterm::style::Print(crlf(text)),
            ResetColor,
            crossterm::style::Print("\r\n")
        )?;
        stdout.flush()
    }

    pub fn clear_screen(&self) -> io::Result<()> {
        self.prompt_row.set(0);
        let mut stdout = io::stdout();
        execute!(stdout, Clear(ClearType::All), crossterm::cursor::MoveTo(0, 0))
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
