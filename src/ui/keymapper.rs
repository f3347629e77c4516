//! Key mapping for remote PTY input
//!
//! Converts key events to VT sequences sent as `input` frames.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Longest mode sequence we look for, minus one
const MODE_CARRY: usize = 7;

/// Input-affecting modes requested by the remote application.
///
/// Tracked by watching DEC private mode sequences go by in the output
/// stream; the output itself is never touched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputModes {
    pub application_cursor: bool,
    pub bracketed_paste: bool,
    carry: Vec<u8>,
}

impl InputModes {
    /// Observe a chunk of remote output
    pub fn observe(&mut self, bytes: &[u8]) {
        let mut window = std::mem::take(&mut self.carry);
        window.extend_from_slice(bytes);

        let mut i = 0;
        while let Some(offset) = window[i..].iter().position(|&b| b == 0x1B) {
            let start = i + offset;
            let rest = &window[start..];
            if rest.starts_with(b"\x1b[?1h") {
                self.application_cursor = true;
            } else if rest.starts_with(b"\x1b[?1l") {
                self.application_cursor = false;
            } else if rest.starts_with(b"\x1b[?2004h") {
                self.bracketed_paste = true;
            } else if rest.starts_with(b"\x1b[?2004l") {
                self.bracketed_paste = false;
            }
            i = start + 1;
        }

        let keep = window.len().min(MODE_CARRY);
        self.carry = window.split_off(window.len() - keep);
    }

    /// Wrap pasted text the way the remote application asked for
    pub fn wrap_paste(&self, text: &str) -> Vec<u8> {
        if self.bracketed_paste {
            format!("\x1b[200~{}\x1b[201~", text).into_bytes()
        } else {
            text.as_bytes().to_vec()
        }
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to bytes for the remote PTY
    pub fn map(event: &KeyEvent, modes: &InputModes) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => Some(vec![0x0D]),

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x7F])
                } else {
                    Some(vec![0x7F])
                }
            }

            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),

            KeyCode::Esc => Some(vec![0x1B]),

            // Arrow keys
            KeyCode::Up => Some(Self::arrow_key(b'A', mods, modes)),
            KeyCode::Down => Some(Self::arrow_key(b'B', mods, modes)),
            KeyCode::Right => Some(Self::arrow_key(b'C', mods, modes)),
            KeyCode::Left => Some(Self::arrow_key(b'D', mods, modes)),

            // Navigation keys
            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Some(Self::function_key(n, mods)).filter(|b| !b.is_empty()),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_lowercase() {
                return vec![(ch as u8) - b'a' + 1];
            } else if ch.is_ascii_uppercase() {
                return vec![(ch as u8) - b'A' + 1];
            }
            match ch {
                '@' | '`' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' | '~' => return vec![0x1E],
                '_' | '?' => return vec![0x1F],
                _ => {}
            }
        }

        // Ctrl + Alt + letter
        if mods.contains(Modifiers::CTRL | Modifiers::ALT) && ch.is_ascii_alphabetic() {
            let ctrl_code = (ch.to_ascii_lowercase() as u8) - b'a' + 1;
            return vec![0x1B, ctrl_code];
        }

        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
            let mut bytes = vec![0x1B];
            bytes.extend(ch.to_string().as_bytes());
            return bytes;
        }

        ch.to_string().into_bytes()
    }

    fn arrow_key(key: u8, mods: Modifiers, modes: &InputModes) -> Vec<u8> {
        if !mods.is_empty() {
            // ESC [ 1 ; <mod> <key>
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        } else if modes.application_cursor {
            vec![0x1B, b'O', key]
        } else {
            vec![0x1B, b'[', key]
        }
    }

    /// Home, End
    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        }
    }

    /// PageUp, PageDown, Insert, Delete
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        // (ss3 final byte, csi number)
        let (ss3, csi) = match n {
            1 => (Some(b'P'), 0),
            2 => (Some(b'Q'), 0),
            3 => (Some(b'R'), 0),
            4 => (Some(b'S'), 0),
            5 => (None, 15),
            6 => (None, 17),
            7 => (None, 18),
            8 => (None, 19),
            9 => (None, 20),
            10 => (None, 21),
            11 => (None, 23),
            12 => (None, 24),
            _ => return vec![],
        };

        match (ss3, mods.is_empty()) {
            (Some(key), true) => vec![0x1B, b'O', key],
            (Some(key), false) => {
                format!("\x1b[1;{}{}", Self::modifier_code(mods), key as char).into_bytes()
            }
            (None, true) => format!("\x1b[{}~", csi).into_bytes(),
            (None, false) => format!("\x1b[{};{}~", csi, Self::modifier_code(mods)).into_bytes(),
        }
    }

    /// xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let modes = InputModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"a".to_vec()));

        // Ctrl+C
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x03]));

        // Alt+x
        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event, &modes), Some(vec![0x1B, b'x']));

        let event = key_event(KeyCode::Char('é'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_arrow_keys_follow_cursor_mode() {
        let mut modes = InputModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[A".to_vec()));

        modes.observe(b"\x1b[?1h\x1b=");
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1bOA".to_vec()));

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[1;5A".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        let modes = InputModes::default();

        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1bOP".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[15~".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event, &modes), Some(b"\x1b[15;2~".to_vec()));

        let event = key_event(KeyCode::F(20), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event, &modes), None);
    }

    #[test]
    fn test_modes_survive_split_sequences() {
        let mut modes = InputModes::default();
        modes.observe(b"vim starting\x1b[?20");
        assert!(!modes.bracketed_paste);
        modes.observe(b"04h");
        assert!(modes.bracketed_paste);

        modes.observe(b"bye\x1b[?2004l\x1b[?1l");
        assert!(!modes.bracketed_paste);
        assert!(!modes.application_cursor);
    }

    #[test]
    fn test_last_mode_change_wins() {
        let mut modes = InputModes::default();
        modes.observe(b"\x1b[?1h....\x1b[?1l");
        assert!(!modes.application_cursor);
        modes.observe(b"x");
        assert!(!modes.application_cursor);
    }

    #[test]
    fn test_paste_wrapping() {
        let mut modes = InputModes::default();
        assert_eq!(modes.wrap_paste("ls\n"), b"ls\n".to_vec());
        modes.bracketed_paste = true;
        assert_eq!(modes.wrap_paste("ls\n"), b"\x1b[200~ls\n\x1b[201~".to_vec());
    }
}
