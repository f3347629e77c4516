//! Connection state and reconnection policy
//!
//! Holds the channel state enum, failure classification and the capped
//! exponential backoff used between automatic reconnect attempts.

use std::fmt;
use std::time::Duration;

/// How a channel failure should be treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected to resolve on its own; retried with backoff
    Transient,
    /// Needs a human or config change; never retried automatically
    Permanent,
}

/// Lifecycle state of the PTY channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Live,
    Closing,
    Disconnected,
    Failed {
        kind: FailureKind,
        message: Option<String>,
    },
}

impl ConnectionState {
    /// A channel is open or being opened
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticating | ConnectionState::Live
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. })
    }

    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            ConnectionState::Failed {
                kind: FailureKind::Permanent,
                ..
            }
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting..."),
            ConnectionState::Authenticating => write!(f, "authenticating..."),
            ConnectionState::Live => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed { message: Some(m), .. } => write!(f, "{}", m),
            ConnectionState::Failed { message: None, .. } => write!(f, "error"),
        }
    }
}

/// Structured error codes that mean retrying cannot help
const PERMANENT_CODES: &[&str] = &[
    "auth_failed",
    "unauthorized",
    "forbidden",
    "disabled",
    "unavailable",
    "not_granted",
];

/// Message fragments the server uses for permanent failures
const PERMANENT_SIGNATURES: &[&str] = &[
    "Authentication failed",
    "Access denied",
    "not available",
    "ALLOW_ALL_COMMANDS",
];

/// Classify a server error frame. A structured code wins over the text.
pub fn classify(message: &str, code: Option<&str>) -> FailureKind {
    if let Some(code) = code {
        return if PERMANENT_CODES.contains(&code) {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        };
    }

    if PERMANENT_SIGNATURES.iter().any(|s| message.contains(s)) {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

/// Backoff tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// `min(base * 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

/// Why an automatic reconnect was not scheduled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Manual reconnect or an intentional remote exit
    Suppressed,
    Permanent,
    ModeInactive,
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    Skip(SkipReason),
}

/// Reconnect bookkeeping for one channel
#[derive(Debug)]
pub struct ReconnectPolicy {
    backoff: BackoffConfig,
    attempt: u32,
    last_error_kind: Option<FailureKind>,
    suppress_auto_reconnect: bool,
}

impl ReconnectPolicy {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            attempt: 0,
            last_error_kind: None,
            suppress_auto_reconnect: false,
        }
    }

    /// Back to `{0, none, false}`
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_error_kind = None;
        self.suppress_auto_reconnect = false;
    }

    /// Skip the next reconnect decision
    pub fn suppress_once(&mut self) {
        self.suppress_auto_reconnect = true;
    }

    pub fn clear_suppression(&mut self) {
        self.suppress_auto_reconnect = false;
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        self.last_error_kind = Some(kind);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[cfg(test)]
    pub fn last_error_kind(&self) -> Option<FailureKind> {
        self.last_error_kind
    }

    #[cfg(test)]
    pub fn is_suppressed(&self) -> bool {
        self.suppress_auto_reconnect
    }

    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    /// Decide what to do after the channel closed.
    ///
    /// A pending suppression is consumed by this call whatever the outcome.
    pub fn decide(&mut self, interactive: bool) -> ReconnectDecision {
        if std::mem::take(&mut self.suppress_auto_reconnect) {
            return ReconnectDecision::Skip(SkipReason::Suppressed);
        }
        if self.last_error_kind == Some(FailureKind::Permanent) {
            return ReconnectDecision::Skip(SkipReason::Permanent);
        }
        if !interactive {
            return ReconnectDecision::Skip(SkipReason::ModeInactive);
        }
        if self.attempt >= self.backoff.max_attempts {
            return ReconnectDecision::Skip(SkipReason::Exhausted);
        }

        self.attempt += 1;
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay: self.backoff.delay_for(self.attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delays(policy: &mut ReconnectPolicy) -> Vec<u128> {
        let mut out = Vec::new();
        while let ReconnectDecision::Retry { delay, .. } = policy.decide(true) {
            out.push(delay.as_millis());
        }
        out
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let mut policy = ReconnectPolicy::new(BackoffConfig::default());
        assert_eq!(delays(&mut policy), vec![2000, 4000, 8000, 16000, 30000]);
        assert_eq!(policy.decide(true), ReconnectDecision::Skip(SkipReason::Exhausted));
    }

    #[test]
    fn test_backoff_is_monotonic_for_large_attempts() {
        let backoff = BackoffConfig::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= backoff.cap);
            previous = delay;
        }
        assert_eq!(backoff.delay_for(40), backoff.cap);
    }

    #[test]
    fn test_suppression_is_consumed_once() {
        let mut policy = ReconnectPolicy::new(BackoffConfig::default());
        policy.suppress_once();
        assert_eq!(policy.decide(true), ReconnectDecision::Skip(SkipReason::Suppressed));
        assert!(matches!(policy.decide(true), ReconnectDecision::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let mut policy = ReconnectPolicy::new(BackoffConfig::default());
        policy.record_failure(FailureKind::Permanent);
        for _ in 0..10 {
            assert_eq!(policy.decide(true), ReconnectDecision::Skip(SkipReason::Permanent));
        }
        policy.reset();
        assert!(matches!(policy.decide(true), ReconnectDecision::Retry { .. }));
    }

    #[test]
    fn test_inactive_mode_skips() {
        let mut policy = ReconnectPolicy::new(BackoffConfig::default());
        assert_eq!(policy.decide(false), ReconnectDecision::Skip(SkipReason::ModeInactive));
        assert_eq!(policy.attempt(), 0);
    }

    #[test]
    fn test_classify_by_text() {
        assert_eq!(classify("Authentication failed", None), FailureKind::Permanent);
        assert_eq!(
            classify("PTY requires ALLOW_ALL_COMMANDS=1", None),
            FailureKind::Permanent
        );
        assert_eq!(classify("Terminal not available", None), FailureKind::Permanent);
        assert_eq!(classify("Connection reset by peer", None), FailureKind::Transient);
    }

    #[test]
    fn test_classify_code_takes_precedence() {
        assert_eq!(
            classify("Authentication failed", Some("server_restarting")),
            FailureKind::Transient
        );
        assert_eq!(classify("try later", Some("forbidden")), FailureKind::Permanent);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Live.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed {
                kind: FailureKind::Permanent,
                message: Some("Authentication failed".to_string()),
            }
            .to_string(),
            "Authentication failed"
        );
    }
}
