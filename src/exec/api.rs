//! HTTP client for the execution server
//!
//! Every request carries the opaque identity token in
//! [`IDENTITY_HEADER`]. Calls block; callers run them on worker threads.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Header carrying the identity token
pub const IDENTITY_HEADER: &str = "X-Telegram-Init-Data";

/// Upper bound for a single request, execution included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; the message comes from the response body
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Result of one execution, as returned by `POST /api/execute`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: String,
    #[serde(default, rename = "error", deserialize_with = "blank_as_none")]
    pub error_text: Option<String>,
    #[serde(default, rename = "exit_code")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Result standing in for a request that never produced one
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output: String::new(),
            error_text: Some(if message.is_empty() {
                "Unknown error".to_string()
            } else {
                message
            }),
            exit_code: Some(-1),
        }
    }
}

fn null_as_default<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn blank_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// `GET /api/session`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

/// `GET /api/commands`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CommandList {
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    #[serde(rename = "type")]
    language: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
struct FailureBody {
    message: Option<String>,
    error: Option<String>,
}

/// Message for a non-success response: body `message`, then `error`,
/// then the bare status.
pub fn failure_message(status: u16, body: &str) -> String {
    serde_json::from_str::<FailureBody>(body)
        .ok()
        .and_then(|b| {
            b.message
                .filter(|m| !m.is_empty())
                .or(b.error.filter(|e| !e.is_empty()))
        })
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Decode the body of `POST /api/execute`
pub fn decode_execute_response(status: u16, body: &str) -> Result<ExecutionResult> {
    if !(200..300).contains(&status) {
        return Err(ApiError::Status {
            status,
            message: failure_message(status, body),
        });
    }
    Ok(serde_json::from_str(body)?)
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    token: String,
}

impl ApiClient {
    pub fn new(base: &str, token: &str) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn execute(&self, language: &str, code: &str) -> Result<ExecutionResult> {
        let response = self
            .http
            .post(self.url("/api/execute"))
            .header(IDENTITY_HEADER, &self.token)
            .json(&ExecuteBody { language, code })
            .send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        decode_execute_response(status, &body)
    }

    /// `None` when the server refuses
    pub fn session_info(&self) -> Result<Option<SessionInfo>> {
        let response = self
            .http
            .get(self.url("/api/session"))
            .header(IDENTITY_HEADER, &self.token)
            .send()?;
        json_if_ok(response)
    }

    /// `None` when the server refuses
    pub fn commands(&self) -> Result<Option<CommandList>> {
        let response = self
            .http
            .get(self.url("/api/commands"))
            .header(IDENTITY_HEADER, &self.token)
            .send()?;
        json_if_ok(response)
    }

    pub fn reset_session(&self) -> Result<bool> {
        let response = self
            .http
            .post(self.url("/api/session/reset"))
            .header(IDENTITY_HEADER, &self.token)
            .send()?;
        Ok(response.status().is_success())
    }
}

fn json_if_ok<T: for<'de> Deserialize<'de>>(response: Response) -> Result<Option<T>> {
    if response.status() != StatusCode::OK {
        return Ok(None);
    }
    let body = response.text()?;
    Ok(Some(serde_json::from_str(&body)?))
}
