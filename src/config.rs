//! Configuration for ptylink.
//!
//! Settings are read from `~/.ptylink/config.toml`; every field is
//! optional and command-line flags override the file:
//!
//! ```toml
//! server = "http://127.0.0.1:8080"
//! token = ""            # PTYLINK_TOKEN wins when set
//! language = "sh"       # sh, py, js, java
//! log_level = "info"
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//! settle_delay_ms = 50
//!
//! [keepalive]
//! ping_interval_secs = 30   # 0 disables
//!
//! [history]
//! capacity = 100
//! path = ""                 # default ~/.ptylink/history.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::reconnect::BackoffConfig;
use crate::core::session::SessionConfig;
use crate::history::HISTORY_LIMIT;

/// Environment variable holding the identity token
pub const TOKEN_ENV: &str = "PTYLINK_TOKEN";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "PTYLINK_LOG";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL for REST and WebSocket endpoints
    pub server: String,
    /// Opaque identity token
    pub token: String,
    /// Initial language tag for one-shot execution
    pub language: String,
    pub log_level: String,
    pub reconnect: ReconnectConfig,
    pub keepalive: KeepaliveConfig,
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:8080".to_string(),
            token: String::new(),
            language: "sh".to_string(),
            log_level: "info".to_string(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Pause between closing and reopening on a manual reconnect
    pub settle_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            settle_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub ping_interval_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    /// Empty means the default location
    pub path: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: HISTORY_LIMIT,
            path: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from `~/.ptylink/config.toml`, falling back to
    /// defaults when the file is missing or invalid.
    ///
    /// A load failure is handed back rather than logged: this runs before
    /// the subscriber is installed.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        let (mut config, error) = match app_dir().map(|dir| dir.join("config.toml")) {
            Some(path) => Self::load_or_default(&path),
            None => (Self::default(), None),
        };
        config.apply_env();
        (config, error)
    }

    /// Missing file gives defaults silently; an unreadable or invalid one
    /// gives defaults plus the error
    pub fn load_or_default(path: &Path) -> (Self, Option<anyhow::Error>) {
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load_from(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.token = token;
            }
        }
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.reconnect.base_delay_ms),
            cap: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            credential: self.token.clone(),
            backoff: self.backoff(),
            settle_delay: Duration::from_millis(self.reconnect.settle_delay_ms),
            ping_interval: match self.keepalive.ping_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Where history is persisted; `None` keeps it in memory
    pub fn history_path(&self) -> Option<PathBuf> {
        if !self.history.path.is_empty() {
            return Some(PathBuf::from(&self.history.path));
        }
        app_dir().map(|dir| dir.join("history.json"))
    }
}

/// `~/.ptylink`, created on first use
pub fn app_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".ptylink");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
