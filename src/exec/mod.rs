//! One-shot command execution over HTTP.
//!
//! - **api**: Blocking client for the REST endpoints
//! - **pipeline**: Single-flight submission and result binding

pub mod api;
pub mod pipeline;
