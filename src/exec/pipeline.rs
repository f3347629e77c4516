//! Single-flight execution pipeline
//!
//! Turns one submitted command into exactly one result. At most one
//! request is outstanding; the next result always belongs to it, so no
//! explicit correlation id travels with the request.

use std::sync::mpsc::Sender;
use std::thread;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::api::{ApiClient, ApiError, ExecutionResult};
use crate::app::AppEvent;
use crate::history::HistoryBuffer;

/// One accepted submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Monotonic per process
    pub id: u64,
    pub language: String,
    pub source: String,
    pub submitted_at: SystemTime,
}

/// Sends requests to the remote endpoint; results come back through
/// [`ExecutionPipeline::complete`].
pub trait Executor {
    fn dispatch(&mut self, request: &ExecutionRequest);
}

/// Runs each request on its own thread and posts the outcome as an event
pub struct HttpExecutor {
    api: ApiClient,
    events: Sender<AppEvent>,
}

impl HttpExecutor {
    pub fn new(api: ApiClient, events: Sender<AppEvent>) -> Self {
        Self { api, events }
    }
}

impl Executor for HttpExecutor {
    fn dispatch(&mut self, request: &ExecutionRequest) {
        let api = self.api.clone();
        let events = self.events.clone();
        let language = request.language.clone();
        let source = request.source.clone();
        let id = request.id;

        let spawned = thread::Builder::new()
            .name(format!("exec-{}", id))
            .spawn(move || {
                let outcome = api.execute(&language, &source);
                let _ = events.send(AppEvent::ExecutionFinished(outcome));
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn executor thread: {}", e);
            let _ = self.events.send(AppEvent::ExecutionFinished(Err(ApiError::Status {
                status: 0,
                message: format!("Failed to start request: {}", e),
            })));
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Nothing but whitespace
    Empty,
    /// A request is already outstanding
    Busy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted(ExecutionRequest),
    Rejected(Rejection),
}

/// A finished request with the result bound to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completed {
    pub request: ExecutionRequest,
    pub result: ExecutionResult,
}

pub struct ExecutionPipeline<E: Executor> {
    executor: E,
    history: HistoryBuffer,
    pending: Option<ExecutionRequest>,
    next_id: u64,
}

impl<E: Executor> ExecutionPipeline<E> {
    pub fn new(executor: E, history: HistoryBuffer) -> Self {
        Self {
            executor,
            history,
            pending: None,
            next_id: 1,
        }
    }

    pub fn submit(&mut self, language: &str, source: &str) -> Submission {
        let source = source.trim();
        if source.is_empty() {
            return Submission::Rejected(Rejection::Empty);
        }
        if let Some(pending) = &self.pending {
            debug!("Rejecting submission while request {} is outstanding", pending.id);
            return Submission::Rejected(Rejection::Busy);
        }

        self.history.append(source);

        let request = ExecutionRequest {
            id: self.next_id,
            language: language.to_string(),
            source: source.to_string(),
            submitted_at: SystemTime::now(),
        };
        self.next_id += 1;

        info!("Executing request {} ({})", request.id, request.language);
        self.pending = Some(request.clone());
        self.executor.dispatch(&request);
        Submission::Accepted(request)
    }

    /// Bind an outcome to the outstanding request. Failures become a
    /// result with exit code -1. The request is cleared either way.
    pub fn complete(&mut self, outcome: Result<ExecutionResult, ApiError>) -> Option<Completed> {
        let Some(request) = self.pending.take() else {
            warn!("Dropping execution result with no outstanding request");
            return None;
        };

        let elapsed = request.submitted_at.elapsed().unwrap_or_default();
        let result = match outcome {
            Ok(result) => {
                debug!("Request {} finished in {:?}", request.id, elapsed);
                result
            }
            Err(ApiError::Status { status, message }) => {
                warn!("Request {} rejected with status {}: {}", request.id, status, message);
                ExecutionResult::failure(message)
            }
            Err(e) => {
                warn!("Request {} failed: {}", request.id, e);
                ExecutionResult::failure(e.to_string())
            }
        };
        Some(Completed { request, result })
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    #[cfg(test)]
    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryBuffer {
        &mut self.history
    }
}

/// How a result should be displayed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    /// Neither clearly good nor bad (non-zero exit without error text)
    Neutral,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    /// Never empty
    pub text: String,
    pub outcome: Outcome,
    /// Non-zero exit code worth showing
    pub exit_badge: Option<i32>,
}

impl Rendered {
    /// Badge text shown after the output, e.g. `exit: 2`
    pub fn badge(&self) -> Option<String> {
        self.exit_badge.map(|code| format!("exit: {}", code))
    }
}

/// Apply the display rules to a result
pub fn render(result: &ExecutionResult) -> Rendered {
    let succeeded = result.exit_code == Some(0);
    let mut text = result.output.clone();
    let mut has_error = false;

    if let Some(error) = &result.error_text {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(error);
        has_error = !succeeded;
    }

    if text.is_empty() {
        text = if succeeded { "(completed)" } else { "(no output)" }.to_string();
    }

    let outcome = if has_error {
        Outcome::Error
    } else if succeeded {
        Outcome::Success
    } else {
        Outcome::Neutral
    };

    Rendered {
        text,
        outcome,
        exit_badge: result.exit_code.filter(|&code| code != 0),
    }
}
