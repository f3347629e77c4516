//! Command editor for prompt mode. Source may span several rows; rows are
//! separated by `\n` in the buffer and submitted as-is.

use unicode_width::UnicodeWidthChar;

/// Columns a tab occupies on screen
const TAB_WIDTH: usize = 4;

/// Editable input. The cursor is a char index into the whole buffer.
#[derive(Debug, Default, Clone)]
pub struct PromptLine {
    chars: Vec<char>,
    cursor: usize,
}

fn display_width(chars: &[char]) -> usize {
    chars
        .iter()
        .map(|&c| match c {
            '\t' => TAB_WIDTH,
            c => UnicodeWidthChar::width(c).unwrap_or(0),
        })
        .sum()
}

impl PromptLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, c: char) {
        self.chars.insert(self.cursor, c);
        self.cursor += 1;
    }

    /// Alt+Enter
    pub fn insert_newline(&mut self) {
        self.insert('\n');
    }

    /// Pasted text: CRLF and lone CR become `\n`, tabs are kept, other
    /// control characters are dropped
    pub fn insert_str(&mut self, text: &str) {
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    self.insert('\n');
                }
                '\n' | '\t' => self.insert(c),
                c if c.is_control() => {}
                c => self.insert(c),
            }
        }
    }

    /// Delete the char before the cursor
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
        true
    }

    /// Delete the char under the cursor
    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.chars.len() {
            return false;
        }
        self.chars.remove(self.cursor);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    /// Start of the row holding `index`
    fn row_start(&self, index: usize) -> usize {
        self.chars[..index]
            .iter()
            .rposition(|&c| c == '\n')
            .map_or(0, |p| p + 1)
    }

    /// End of the row holding `index`, exclusive of its `\n`
    fn row_end(&self, index: usize) -> usize {
        self.chars[index..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(self.chars.len(), |p| index + p)
    }

    pub fn on_first_row(&self) -> bool {
        !self.chars[..self.cursor].contains(&'\n')
    }

    pub fn on_last_row(&self) -> bool {
        !self.chars[self.cursor..].contains(&'\n')
    }

    /// Move to the same char offset in the previous row; false on the first row
    pub fn move_up(&mut self) -> bool {
        if self.on_first_row() {
            return false;
        }
        let start = self.row_start(self.cursor);
        let offset = self.cursor - start;
        let prev_start = self.row_start(start - 1);
        self.cursor = prev_start + offset.min(start - 1 - prev_start);
        true
    }

    /// Move to the same char offset in the next row; false on the last row
    pub fn move_down(&mut self) -> bool {
        if self.on_last_row() {
            return false;
        }
        let offset = self.cursor - self.row_start(self.cursor);
        let next_start = self.row_end(self.cursor) + 1;
        let next_end = self.row_end(next_start);
        self.cursor = next_start + offset.min(next_end - next_start);
        true
    }

    pub fn home(&mut self) {
        self.cursor = self.row_start(self.cursor);
    }

    pub fn end(&mut self) {
        self.cursor = self.row_end(self.cursor);
    }

    /// Ctrl+U: clear the current row up to the cursor
    pub fn kill_to_start(&mut self) {
        let start = self.row_start(self.cursor);
        self.chars.drain(start..self.cursor);
        self.cursor = start;
    }

    /// Replace the contents, cursor at the end
    pub fn set(&mut self, text: &str) {
        self.chars = text.chars().collect();
        self.cursor = self.chars.len();
    }

    /// Take the contents, leaving the line empty
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.chars).into_iter().collect()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Zero-based row of the cursor
    pub fn cursor_row(&self) -> usize {
        self.chars[..self.cursor].iter().filter(|&&c| c == '\n').count()
    }

    /// Display column of the cursor within its row (wide chars count
    /// double, tabs count `TAB_WIDTH`)
    pub fn cursor_column(&self) -> usize {
        display_width(&self.chars[self.row_start(self.cursor)..self.cursor])
    }

    /// Rows as drawn on screen, tabs expanded
    pub fn rows(&self) -> Vec<String> {
        self.chars
            .split(|&c| c == '\n')
            .map(|row| {
                row.iter()
                    .fold(String::with_capacity(row.len()), |mut out, &c| {
                        match c {
                            '\t' => out.push_str(&" ".repeat(TAB_WIDTH)),
                            c => out.push(c),
                        }
                        out
                    })
            })
            .collect()
    }
}
