//! Message envelope codec for the PTY channel.
//!
//! Every frame on the channel is a JSON object tagged by `type`:
//!
//! ```text
//! {"type":"auth","init_data":"..."}     client -> server
//! {"type":"input","data":"ls\r"}        client -> server
//! {"type":"resize","rows":24,"cols":80} client -> server
//! {"type":"ping"}                       client -> server
//! {"type":"auth_ok"}                    server -> client
//! {"type":"output","data":"..."}        server -> client
//! {"type":"error","message":"..."}      server -> client
//! {"type":"exit"}                       server -> client
//! {"type":"pong"}                       server -> client
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to encode {kind} frame: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A single channel message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Opaque identity token, the only frame allowed before `AuthOk`
    Auth {
        #[serde(rename = "init_data")]
        credential: String,
    },
    AuthOk,
    /// Keystroke or paste bytes
    Input { data: String },
    Resize { rows: u16, cols: u16 },
    /// Remote PTY output, rendered verbatim
    Output { data: String },
    /// Server-side failure. `code` is optional and takes precedence over
    /// the message text when classifying the failure.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Remote session ended
    Exit,
    Ping,
    Pong,
}

impl Message {
    /// Build an input frame from raw keystroke bytes
    pub fn input(bytes: &[u8]) -> Self {
        Message::Input {
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Wire name of the message tag
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Auth { .. } => "auth",
            Message::AuthOk => "auth_ok",
            Message::Input { .. } => "input",
            Message::Resize { .. } => "resize",
            Message::Output { .. } => "output",
            Message::Error { .. } => "error",
            Message::Exit => "exit",
            Message::Ping => "ping",
            Message::Pong => "pong",
        }
    }

    /// Whether the client may send this before authentication completes
    pub fn allowed_before_auth(&self) -> bool {
        matches!(self, Message::Auth { .. })
    }
}

/// Serialize a message into a text frame
pub fn encode(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(|source| ProtocolError::Encode {
        kind: message.kind(),
        source,
    })
}

/// Parse a text frame
pub fn decode(frame: &str) -> Result<Message> {
    serde_json::from_str(frame).map_err(ProtocolError::Decode)
}
