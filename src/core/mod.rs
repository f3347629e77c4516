//! PTY channel components.
//!
//! This module contains the connection logic for interactive sessions:
//!
//! - **protocol**: JSON frame codec for the `/ws/terminal` channel
//! - **reconnect**: Connection states, failure classification and backoff
//! - **timer**: Cancellable timers polled by the main loop
//! - **transport**: WebSocket worker threads behind the `Connector` seam
//! - **session**: The connection manager tying the pieces together
//!
//! # Architecture
//!
//! ```text
//! SessionConnectionManager
//! ├── Connector / Transport (one worker thread per channel generation)
//! ├── Scheduler (reconnect, settle and keepalive timers)
//! ├── ReconnectPolicy (attempt counter + backoff)
//! └── DisplayAdapter
//!     └── TerminalWidget
//! ```

pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod timer;
pub mod transport;
