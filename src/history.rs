//! Command history for ptylink
//!
//! Bounded log of submitted commands with arrow-key style recall,
//! persisted as a JSON array after every change.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Maximum number of history entries
pub const HISTORY_LIMIT: usize = 100;

/// Recall direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recall {
    /// Older entry (arrow up)
    Previous,
    /// Newer entry (arrow down)
    Next,
}

/// Command history storage
#[derive(Debug)]
pub struct HistoryBuffer {
    /// All history entries (newest last)
    entries: Vec<String>,
    /// Recall position; `entries.len()` means "new entry"
    cursor: usize,
    /// File path for persistence
    file_path: Option<PathBuf>,
    /// Maximum entries
    max_entries: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::in_memory(HISTORY_LIMIT)
    }
}

impl HistoryBuffer {
    /// History that is never written to disk
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            file_path: None,
            max_entries: max_entries.max(1),
        }
    }

    /// Load history from `path`; missing or corrupt files give an empty buffer
    pub fn open(path: PathBuf, max_entries: usize) -> Self {
        let mut history = Self {
            file_path: Some(path),
            ..Self::in_memory(max_entries)
        };
        history.load();
        history
    }

    /// Load history from file
    fn load(&mut self) {
        let Some(ref path) = self.file_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| Ok(serde_json::from_str::<Vec<String>>(&content)?))
        {
            Ok(mut entries) => {
                if entries.len() > self.max_entries {
                    entries.drain(..entries.len() - self.max_entries);
                }
                debug!("Loaded {} history entries", entries.len());
                self.entries = entries;
            }
            Err(e) => warn!("Ignoring unreadable history {}: {}", path.display(), e),
        }
        self.cursor = self.entries.len();
    }

    /// Save history to file
    fn save(&self) {
        let Some(ref path) = self.file_path else {
            return;
        };
        let result = serde_json::to_string(&self.entries)
            .map_err(anyhow::Error::from)
            .and_then(|content| Ok(fs::write(path, content)?));
        if let Err(e) = result {
            warn!("Failed to save history to {}: {}", path.display(), e);
        }
    }

    /// Add a command; returns false when it repeats the previous entry
    pub fn append(&mut self, command: &str) -> bool {
        if self.entries.last().map(String::as_str) == Some(command) {
            self.cursor = self.entries.len();
            return false;
        }

        self.entries.push(command.to_string());

        // Trim if exceeding limit
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }

        self.cursor = self.entries.len();
        self.save();
        true
    }

    /// Step through history. Returns the text to show, or `None` when the
    /// cursor could not move.
    pub fn recall(&mut self, direction: Recall) -> Option<String> {
        match direction {
            Recall::Previous => {
                if self.cursor == 0 {
                    return None;
                }
                self.cursor -= 1;
                self.entries.get(self.cursor).cloned()
            }
            Recall::Next => {
                if self.cursor >= self.entries.len() {
                    return None;
                }
                self.cursor += 1;
                Some(self.entries.get(self.cursor).cloned().unwrap_or_default())
            }
        }
    }

    /// Stop browsing
    pub fn reset_cursor(&mut self) {
        self.cursor = self.entries.len();
    }

    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bounded_and_ordered() {
        let mut history = HistoryBuffer::default();
        for i in 0..250 {
            history.append(&format!("cmd {}", i));
            assert!(history.len() <= HISTORY_LIMIT);
        }
        let expected: Vec<String> = (150..250).map(|i| format!("cmd {}", i)).collect();
        assert_eq!(history.entries(), expected.as_slice());
        assert_eq!(history.cursor(), HISTORY_LIMIT);
    }

    #[test]
    fn test_consecutive_duplicates_coalesce() {
        let mut history = HistoryBuffer::default();
        assert!(history.append("ls"));
        assert!(!history.append("ls"));
        assert!(history.append("pwd"));
        assert!(history.append("ls"));
        assert_eq!(history.entries(), ["ls", "pwd", "ls"]);
    }

    #[test]
    fn test_recall_previous_then_next_returns_to_new_entry() {
        let mut history = HistoryBuffer::default();
        history.append("a");
        history.append("b");

        assert_eq!(history.recall(Recall::Previous), Some("b".to_string()));
        assert_eq!(history.recall(Recall::Next), Some(String::new()));
        assert_eq!(history.cursor(), history.len());
        assert_eq!(history.recall(Recall::Next), None);
    }

    #[test]
    fn test_recall_stops_at_oldest() {
        let mut history = HistoryBuffer::default();
        history.append("a");
        history.append("b");

        assert_eq!(history.recall(Recall::Previous), Some("b".to_string()));
        assert_eq!(history.recall(Recall::Previous), Some("a".to_string()));
        assert_eq!(history.recall(Recall::Previous), None);
        assert_eq!(history.cursor(), 0);
        assert_eq!(history.recall(Recall::Next), Some("b".to_string()));
    }

    #[test]
    fn test_recall_on_empty_history() {
        let mut history = HistoryBuffer::default();
        assert_eq!(history.recall(Recall::Previous), None);
        assert_eq!(history.recall(Recall::Next), None);
    }

    #[test]
    fn test_append_resets_cursor() {
        let mut history = HistoryBuffer::default();
        history.append("a");
        history.append("b");
        history.recall(Recall::Previous);
        history.recall(Recall::Previous);
        history.append("c");
        assert_eq!(history.cursor(), 3);
    }

    #[test]
    fn test_persists_after_every_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut history = HistoryBuffer::open(path.clone(), HISTORY_LIMIT);
        history.append("echo hi");
        history.append("uname -a");

        let reloaded = HistoryBuffer::open(path, HISTORY_LIMIT);
        assert_eq!(reloaded.entries(), ["echo hi", "uname -a"]);
        assert_eq!(reloaded.cursor(), 2);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{definitely not a list").unwrap();

        let mut history = HistoryBuffer::open(path.clone(), HISTORY_LIMIT);
        assert!(history.is_empty());

        // Still usable, and the next append repairs the file
        history.append("ls");
        assert_eq!(HistoryBuffer::open(path, HISTORY_LIMIT).entries(), ["ls"]);
    }

    #[test]
    fn test_oversized_file_is_truncated_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let entries: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        fs::write(&path, serde_json::to_string(&entries).unwrap()).unwrap();

        let history = HistoryBuffer::open(path, 3);
        assert_eq!(history.entries(), ["2", "3", "4"]);
    }
}
