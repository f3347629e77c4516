//! Session connection manager
//!
//! Owns the PTY channel: opens and authenticates it, frames I/O in both
//! directions, classifies failures and decides when to reconnect.
//!
//! All inputs arrive as [`SessionEvent`]s (transport traffic and timers)
//! or as direct calls from the front end (`connect`, `send`,
//! `manual_reconnect`, mode switches). Every transport and timer event
//! carries the channel generation it belongs to; events from an older
//! generation are dropped so a replaced socket or a cancelled timer can
//! never act on the current channel.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::protocol::{self, Message, ProtocolError};
use super::reconnect::{
    classify, BackoffConfig, ConnectionState, FailureKind, ReconnectDecision, ReconnectPolicy,
    SkipReason,
};
use super::timer::{Scheduler, TimerId, TimerKind};
use super::transport::{Connector, Transport};
use crate::ui::display::{DisplayAdapter, TerminalWidget, WidgetEvent};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Channel is not live ({0})")]
    NotLive(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] super::transport::TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Everything that can happen to a channel from the outside
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport finished opening
    Opened { generation: u64 },
    /// A text frame arrived
    Frame { generation: u64, text: String },
    /// Transport reported an error; a `Closed` follows
    TransportError { generation: u64, message: String },
    Closed { generation: u64 },
    Timer { kind: TimerKind, generation: u64 },
}

impl SessionEvent {
    fn generation(&self) -> u64 {
        match self {
            SessionEvent::Opened { generation }
            | SessionEvent::Frame { generation, .. }
            | SessionEvent::TransportError { generation, .. }
            | SessionEvent::Closed { generation }
            | SessionEvent::Timer { generation, .. } => *generation,
        }
    }
}

/// Manager tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Opaque identity token sent in the `auth` frame
    pub credential: String,
    pub backoff: BackoffConfig,
    /// Pause between force-closing and reconnecting on a manual reconnect
    pub settle_delay: Duration,
    /// Ping period while live; `None` disables keepalive
    pub ping_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            backoff: BackoffConfig::default(),
            settle_delay: Duration::from_millis(50),
            ping_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// Single owner of the channel, its state and its reconnect policy
pub struct SessionConnectionManager<C: Connector, S: Scheduler, W: TerminalWidget> {
    connector: C,
    scheduler: S,
    display: DisplayAdapter<W>,
    config: SessionConfig,
    state: ConnectionState,
    policy: ReconnectPolicy,
    transport: Option<C::Transport>,
    /// Bumped on every new channel and on every teardown
    generation: u64,
    /// Whether the interactive view is the current mode
    interactive: bool,
    reconnect_timer: Option<TimerId>,
    settle_timer: Option<TimerId>,
    keepalive_timer: Option<TimerId>,
}

impl<C: Connector, S: Scheduler, W: TerminalWidget> SessionConnectionManager<C, S, W> {
    pub fn new(config: SessionConfig, connector: C, scheduler: S, widget: W) -> Self {
        Self {
            connector,
            scheduler,
            display: DisplayAdapter::new(widget),
            policy: ReconnectPolicy::new(config.backoff),
            config,
            state: ConnectionState::Idle,
            transport: None,
            generation: 0,
            interactive: false,
            reconnect_timer: None,
            settle_timer: None,
            keepalive_timer: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Live
    }

    #[cfg(test)]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn display(&self) -> &DisplayAdapter<W> {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut DisplayAdapter<W> {
        &mut self.display
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Open a channel unless one is already open or opening
    pub fn connect(&mut self) {
        if self.state.is_active() {
            debug!("connect() ignored while {}", self.state);
            return;
        }

        self.cancel_timer(TimerKind::Reconnect);
        self.cancel_timer(TimerKind::ManualConnect);
        self.generation += 1;
        self.set_state(ConnectionState::Connecting);

        match self.connector.open(self.generation) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                warn!("Failed to open channel: {}", e);
                self.set_state(ConnectionState::Failed {
                    kind: FailureKind::Transient,
                    message: Some(e.to_string()),
                });
                self.policy.record_failure(FailureKind::Transient);
                self.apply_reconnect_policy();
            }
        }
    }

    /// Entry point for transport and timer events
    pub fn handle_event(&mut self, event: SessionEvent) {
        if event.generation() != self.generation {
            debug!(
                "Dropping stale event for generation {} (current {})",
                event.generation(),
                self.generation
            );
            return;
        }

        match event {
            SessionEvent::Opened { .. } => self.on_transport_opened(),
            SessionEvent::Frame { text, .. } => match protocol::decode(&text) {
                Ok(message) => self.on_message(message),
                Err(e) => warn!("Dropping frame: {}", e),
            },
            SessionEvent::TransportError { message, .. } => {
                warn!("Channel error: {}", message);
            }
            SessionEvent::Closed { .. } => self.on_transport_closed(),
            SessionEvent::Timer { kind, .. } => self.on_timer(kind),
        }
    }

    fn on_transport_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Transport opened while {}", self.state);
            return;
        }
        let auth = Message::Auth {
            credential: self.config.credential.clone(),
        };
        match self.send(auth) {
            Ok(()) => self.set_state(ConnectionState::Authenticating),
            Err(e) => warn!("Failed to send auth: {}", e),
        }
    }

    /// Dispatch one decoded inbound message
    pub fn on_message(&mut self, message: Message) {
        match message {
            Message::AuthOk => {
                if self.state != ConnectionState::Authenticating {
                    warn!("Unexpected auth_ok while {}", self.state);
                    return;
                }
                self.set_state(ConnectionState::Live);
                self.policy.reset();
                let resize = self.display.resize_message();
                if let Err(e) = self.send(resize) {
                    warn!("Failed to send initial resize: {}", e);
                }
                self.arm_keepalive();
            }
            Message::Output { data } => self.display.render_output(&data),
            Message::Error { message, code } => {
                let kind = classify(&message, code.as_deref());
                warn!("Remote error ({:?}): {}", kind, message);
                self.policy.record_failure(kind);
                self.cancel_timer(TimerKind::Keepalive);
                self.set_state(ConnectionState::Failed {
                    kind,
                    message: Some(message),
                });
            }
            Message::Exit => {
                info!("Remote session ended");
                self.cancel_timer(TimerKind::Keepalive);
                self.set_state(ConnectionState::Disconnected);
                self.policy.suppress_once();
                if let Some(mut transport) = self.transport.take() {
                    transport.close();
                }
            }
            Message::Pong => debug!("pong"),
            other => debug!("Ignoring unexpected {} frame", other.kind()),
        }
    }

    fn on_transport_closed(&mut self) {
        self.transport = None;
        self.cancel_timer(TimerKind::Keepalive);
        if !self.state.is_failed() {
            self.set_state(ConnectionState::Disconnected);
        }
        self.apply_reconnect_policy();
    }

    fn apply_reconnect_policy(&mut self) {
        match self.policy.decide(self.interactive) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!("Reconnecting in {}ms (attempt {})", delay.as_millis(), attempt);
                self.display.widget_mut().notice(&format!(
                    "reconnecting in {}s (attempt {}/{})",
                    delay.as_secs_f32(),
                    attempt,
                    self.policy.max_attempts()
                ));
                self.cancel_timer(TimerKind::Reconnect);
                let id = self
                    .scheduler
                    .schedule(delay, TimerKind::Reconnect, self.generation);
                self.reconnect_timer = Some(id);
            }
            ReconnectDecision::Skip(SkipReason::Exhausted) => {
                warn!("Giving up after {} reconnect attempts", self.policy.attempt());
                self.display
                    .widget_mut()
                    .notice("could not reconnect; use Ctrl+B r to retry");
            }
            ReconnectDecision::Skip(reason) => debug!("No automatic reconnect: {:?}", reason),
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Reconnect => {
                self.reconnect_timer = None;
                self.connect();
            }
            TimerKind::ManualConnect => {
                self.settle_timer = None;
                // The dropped transport's close was never seen; nothing
                // is left for the suppression to apply to.
                self.policy.clear_suppression();
                self.connect();
            }
            TimerKind::Keepalive => {
                self.keepalive_timer = None;
                if self.is_live() {
                    if let Err(e) = self.send(Message::Ping) {
                        warn!("Failed to send ping: {}", e);
                    }
                    self.arm_keepalive();
                }
            }
        }
    }

    /// Send a frame on a live channel. Anything sent before `auth_ok` is
    /// rejected; nothing is queued across reconnects.
    pub fn send(&mut self, message: Message) -> Result<()> {
        // Auth goes out only while the transport is opening; everything
        // else needs a live channel
        let permitted = if message.allowed_before_auth() {
            self.state == ConnectionState::Connecting
        } else {
            self.is_live()
        };
        if !permitted {
            return Err(SessionError::NotLive(self.state.to_string()));
        }
        self.send_frame(&message)
    }

    fn send_frame(&mut self, message: &Message) -> Result<()> {
        let frame = protocol::encode(message)?;
        match self.transport.as_mut() {
            Some(transport) => Ok(transport.send(frame)?),
            None => Err(SessionError::NotLive(self.state.to_string())),
        }
    }

    /// Forward a widget event to the channel
    pub fn handle_widget_event(&mut self, event: WidgetEvent) -> Result<()> {
        match self.display.translate(event) {
            Some(message) => self.send(message),
            None => Ok(()),
        }
    }

    /// User-requested reconnect: clears any permanent failure and starts
    /// over with a fresh channel after a short settle delay.
    pub fn manual_reconnect(&mut self) {
        info!("Manual reconnect requested");
        self.policy.reset();
        self.policy.suppress_once();
        self.cancel_all_timers();

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
        self.display.widget_mut().clear();
        self.set_state(ConnectionState::Closing);

        let id = self.scheduler.schedule(
            self.config.settle_delay,
            TimerKind::ManualConnect,
            self.generation,
        );
        self.settle_timer = Some(id);
    }

    /// Switch the interactive view on or off
    pub fn set_interactive(&mut self, interactive: bool) {
        if self.interactive == interactive {
            return;
        }
        self.interactive = interactive;

        if interactive {
            if let Err(e) = self.handle_widget_event(WidgetEvent::Activated) {
                debug!("Viewport not reported: {}", e);
            }
            self.display.widget_mut().show_status(&self.state);
            if self.state.is_permanent_failure() {
                debug!("Staying failed until a manual reconnect");
            } else if self.reconnect_timer.is_none() && self.settle_timer.is_none() {
                self.connect();
            }
        } else {
            self.cancel_timer(TimerKind::Reconnect);
        }
    }

    /// Close everything and return to `Idle`
    pub fn shutdown(&mut self) {
        self.cancel_all_timers();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
        self.interactive = false;
        self.set_state(ConnectionState::Idle);
    }

    fn arm_keepalive(&mut self) {
        self.cancel_timer(TimerKind::Keepalive);
        if let Some(interval) = self.config.ping_interval {
            let id = self
                .scheduler
                .schedule(interval, TimerKind::Keepalive, self.generation);
            self.keepalive_timer = Some(id);
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        let slot = match kind {
            TimerKind::Reconnect => &mut self.reconnect_timer,
            TimerKind::ManualConnect => &mut self.settle_timer,
            TimerKind::Keepalive => &mut self.keepalive_timer,
        };
        if let Some(id) = slot.take() {
            self.scheduler.cancel(id);
        }
    }

    fn cancel_all_timers(&mut self) {
        self.cancel_timer(TimerKind::Reconnect);
        self.cancel_timer(TimerKind::ManualConnect);
        self.cancel_timer(TimerKind::Keepalive);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Channel state: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.display.widget_mut().show_status(&self.state);
    }
}

impl<C: Connector, S: Scheduler, W: TerminalWidget> Drop for SessionConnectionManager<C, S, W> {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::transport::TransportError;
    use crate::ui::display::testing::RecordingWidget;
    use crate::ui::display::Viewport;

    #[derive(Default)]
    struct Wire {
        opened: Vec<u64>,
        sent: Vec<String>,
        closed: usize,
        fail_open: bool,
    }

    struct FakeTransport(Rc<RefCell<Wire>>);

    impl Transport for FakeTransport {
        fn send(&mut self, frame: String) -> std::result::Result<(), TransportError> {
            self.0.borrow_mut().sent.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed += 1;
        }
    }

    struct FakeConnector(Rc<RefCell<Wire>>);

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        fn open(&mut self, generation: u64) -> std::result::Result<FakeTransport, TransportError> {
            if self.0.borrow().fail_open {
                return Err(TransportError::Closed);
            }
            self.0.borrow_mut().opened.push(generation);
            Ok(FakeTransport(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        next: u64,
        pending: Vec<(TimerId, Duration, TimerKind, u64)>,
    }

    impl FakeScheduler {
        fn delays(&self, kind: TimerKind) -> Vec<Duration> {
            self.pending
                .iter()
                .filter(|t| t.2 == kind)
                .map(|t| t.1)
                .collect()
        }
    }

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, delay: Duration, kind: TimerKind, generation: u64) -> TimerId {
            let id = TimerId(self.next);
            self.next += 1;
            self.pending.push((id, delay, kind, generation));
            id
        }

        fn cancel(&mut self, id: TimerId) {
            self.pending.retain(|t| t.0 != id);
        }
    }

    type Manager = SessionConnectionManager<FakeConnector, FakeScheduler, RecordingWidget>;

    fn manager() -> (Manager, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let widget = RecordingWidget {
            viewport: Viewport { rows: 40, cols: 120 },
            ..Default::default()
        };
        let config = SessionConfig {
            credential: "token-123".to_string(),
            ping_interval: None,
            ..Default::default()
        };
        let manager = SessionConnectionManager::new(
            config,
            FakeConnector(wire.clone()),
            FakeScheduler::default(),
            widget,
        );
        (manager, wire)
    }

    fn frame(m: &Manager, text: &str) -> SessionEvent {
        SessionEvent::Frame {
            generation: m.generation(),
            text: text.to_string(),
        }
    }

    fn closed(m: &Manager) -> SessionEvent {
        SessionEvent::Closed {
            generation: m.generation(),
        }
    }

    /// Interactive manager with a live channel
    fn live() -> (Manager, Rc<RefCell<Wire>>) {
        let (mut m, wire) = manager();
        m.set_interactive(true);
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        let ok = frame(&m, r#"{"type":"auth_ok"}"#);
        m.handle_event(ok);
        assert_eq!(m.state(), &ConnectionState::Live);
        (m, wire)
    }

    /// Fire the single pending timer of `kind`
    fn fire(m: &mut Manager, kind: TimerKind) {
        let index = m
            .scheduler()
            .pending
            .iter()
            .position(|t| t.2 == kind)
            .expect("timer pending");
        let (_, _, kind, generation) = m.scheduler_mut().pending.remove(index);
        m.handle_event(SessionEvent::Timer { kind, generation });
    }

    #[test]
    fn test_connect_authenticates_then_sizes_viewport() {
        let (m, wire) = live();
        let wire = wire.borrow();
        assert_eq!(wire.opened, vec![1]);
        assert_eq!(
            wire.sent,
            vec![
                r#"{"type":"auth","init_data":"token-123"}"#.to_string(),
                r#"{"type":"resize","rows":40,"cols":120}"#.to_string(),
            ]
        );
        assert_eq!(m.policy().attempt(), 0);
    }

    #[test]
    fn test_connect_is_noop_while_active() {
        let (mut m, wire) = manager();
        m.connect();
        assert_eq!(m.state(), &ConnectionState::Connecting);
        m.connect();
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        m.connect();
        assert_eq!(m.state(), &ConnectionState::Authenticating);
        assert_eq!(wire.borrow().opened.len(), 1);
    }

    #[test]
    fn test_send_before_auth_is_rejected() {
        let (mut m, wire) = manager();
        m.connect();
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        assert!(matches!(
            m.send(Message::input(b"ls\r")),
            Err(SessionError::NotLive(_))
        ));
        assert!(matches!(
            m.handle_widget_event(WidgetEvent::Resize(Viewport { rows: 1, cols: 1 })),
            Err(SessionError::NotLive(_))
        ));
        // Only the auth frame went out
        assert_eq!(wire.borrow().sent.len(), 1);
    }

    #[test]
    fn test_auth_only_while_opening() {
        let (mut m, wire) = live();
        let again = Message::Auth {
            credential: "other".to_string(),
        };
        assert!(matches!(m.send(again), Err(SessionError::NotLive(_))));
        assert_eq!(wire.borrow().sent.len(), 2);
    }

    #[test]
    fn test_input_output_round_trip() {
        let (mut m, wire) = live();
        m.handle_widget_event(WidgetEvent::Input(b"echo \xe2\x82\xac\r".to_vec()))
            .unwrap();
        let sent = wire.borrow().sent.last().cloned().unwrap();
        let data = match protocol::decode(&sent).unwrap() {
            Message::Input { data } => data,
            other => panic!("unexpected {:?}", other),
        };

        let echo = protocol::encode(&Message::Output { data }).unwrap();
        let event = frame(&m, &echo);
        m.handle_event(event);
        assert_eq!(m.display().widget().written, b"echo \xe2\x82\xac\r".to_vec());
    }

    #[test]
    fn test_output_order_is_preserved() {
        let (mut m, _wire) = live();
        for chunk in ["a", "b", "c"] {
            let text = protocol::encode(&Message::Output {
                data: chunk.to_string(),
            })
            .unwrap();
            let event = frame(&m, &text);
            m.handle_event(event);
        }
        assert_eq!(m.display().widget().written, b"abc".to_vec());
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let (mut m, _wire) = live();
        let event = frame(&m, "{not json");
        m.handle_event(event);
        let event = frame(&m, r#"{"type":"warp"}"#);
        m.handle_event(event);
        assert_eq!(m.state(), &ConnectionState::Live);
    }

    #[test]
    fn test_auth_failure_is_permanent_and_never_retries() {
        let (mut m, _wire) = manager();
        m.set_interactive(true);
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        assert_eq!(m.state(), &ConnectionState::Authenticating);

        let event = frame(&m, r#"{"type":"error","message":"Authentication failed"}"#);
        m.handle_event(event);
        assert_eq!(
            m.state(),
            &ConnectionState::Failed {
                kind: FailureKind::Permanent,
                message: Some("Authentication failed".to_string()),
            }
        );

        for _ in 0..3 {
            let event = closed(&m);
            m.handle_event(event);
            assert!(m.scheduler().pending.is_empty());
        }
        assert!(m.state().is_permanent_failure());

        // Re-entering the view does not leave the permanent failure either
        m.set_interactive(false);
        m.set_interactive(true);
        assert!(m.state().is_permanent_failure());
    }

    #[test]
    fn test_transient_close_backs_off() {
        let (mut m, wire) = live();
        let event = closed(&m);
        m.handle_event(event);
        assert_eq!(m.state(), &ConnectionState::Disconnected);
        assert_eq!(
            m.scheduler().delays(TimerKind::Reconnect),
            vec![Duration::from_millis(2000)]
        );

        fire(&mut m, TimerKind::Reconnect);
        assert_eq!(m.state(), &ConnectionState::Connecting);
        assert_eq!(wire.borrow().opened, vec![1, 2]);

        // Second failure in a row doubles the delay
        let event = closed(&m);
        m.handle_event(event);
        assert_eq!(
            m.scheduler().delays(TimerKind::Reconnect),
            vec![Duration::from_millis(4000)]
        );
    }

    #[test]
    fn test_attempts_are_bounded() {
        let (mut m, wire) = live();
        let mut seen = Vec::new();
        loop {
            let event = closed(&m);
            m.handle_event(event);
            match m.scheduler().delays(TimerKind::Reconnect).first() {
                Some(delay) => seen.push(delay.as_millis()),
                None => break,
            }
            fire(&mut m, TimerKind::Reconnect);
        }
        assert_eq!(seen, vec![2000, 4000, 8000, 16000, 30000]);
        assert_eq!(m.state(), &ConnectionState::Disconnected);
        assert_eq!(wire.borrow().opened.len(), 6);
        assert!(m
            .display()
            .widget()
            .notices
            .last()
            .unwrap()
            .contains("Ctrl+B r"));
    }

    #[test]
    fn test_transient_error_then_close_retries() {
        let (mut m, _wire) = live();
        let event = frame(&m, r#"{"type":"error","message":"PTY crashed"}"#);
        m.handle_event(event);
        assert_eq!(
            m.state(),
            &ConnectionState::Failed {
                kind: FailureKind::Transient,
                message: Some("PTY crashed".to_string()),
            }
        );
        let event = closed(&m);
        m.handle_event(event);
        // Error status is kept, not overwritten by "disconnected"
        assert!(m.state().is_failed());
        assert_eq!(m.scheduler().delays(TimerKind::Reconnect).len(), 1);
    }

    #[test]
    fn test_exit_closes_without_reconnect() {
        let (mut m, wire) = live();
        let event = frame(&m, r#"{"type":"exit"}"#);
        m.handle_event(event);
        assert_eq!(m.state(), &ConnectionState::Disconnected);
        assert_eq!(wire.borrow().closed, 1);

        let event = closed(&m);
        m.handle_event(event);
        assert!(m.scheduler().pending.is_empty());
        assert_eq!(m.state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn test_manual_reconnect_clears_permanent_failure() {
        let (mut m, wire) = live();
        let event = frame(&m, r#"{"type":"error","message":"Access denied"}"#);
        m.handle_event(event);
        let old = m.generation();

        m.manual_reconnect();
        assert_eq!(m.state(), &ConnectionState::Closing);
        assert_eq!(m.policy().last_error_kind(), None);
        assert_eq!(m.policy().attempt(), 0);
        assert_eq!(wire.borrow().closed, 1);
        assert_eq!(m.display().widget().clears, 1);
        assert_eq!(
            m.scheduler().delays(TimerKind::ManualConnect),
            vec![Duration::from_millis(50)]
        );

        // The old socket's close arrives late and is ignored
        m.handle_event(SessionEvent::Closed { generation: old });
        assert!(m.scheduler().delays(TimerKind::Reconnect).is_empty());

        fire(&mut m, TimerKind::ManualConnect);
        assert_eq!(m.state(), &ConnectionState::Connecting);
        assert!(!m.policy().is_suppressed());

        // A later transient drop reconnects automatically again
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        let ok = frame(&m, r#"{"type":"auth_ok"}"#);
        m.handle_event(ok);
        let event = closed(&m);
        m.handle_event(event);
        assert_eq!(m.scheduler().delays(TimerKind::Reconnect).len(), 1);
    }

    #[test]
    fn test_manual_reconnect_cancels_pending_retry() {
        let (mut m, _wire) = live();
        let event = closed(&m);
        m.handle_event(event);
        assert_eq!(m.scheduler().delays(TimerKind::Reconnect).len(), 1);

        m.manual_reconnect();
        assert!(m.scheduler().delays(TimerKind::Reconnect).is_empty());
        assert_eq!(m.scheduler().delays(TimerKind::ManualConnect).len(), 1);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let (mut m, wire) = live();
        let event = closed(&m);
        m.handle_event(event);
        let stale = m.generation();
        m.shutdown();
        m.handle_event(SessionEvent::Timer {
            kind: TimerKind::Reconnect,
            generation: stale,
        });
        assert_eq!(m.state(), &ConnectionState::Idle);
        assert_eq!(wire.borrow().opened.len(), 1);
    }

    #[test]
    fn test_leaving_interactive_stops_reconnects() {
        let (mut m, _wire) = live();
        m.set_interactive(false);
        let event = closed(&m);
        m.handle_event(event);
        assert!(m.scheduler().pending.is_empty());

        // A pending retry is cancelled when the view is left
        m.set_interactive(true);
        assert_eq!(m.state(), &ConnectionState::Connecting);
        let event = closed(&m);
        m.handle_event(event);
        assert_eq!(m.scheduler().delays(TimerKind::Reconnect).len(), 1);
        m.set_interactive(false);
        assert!(m.scheduler().pending.is_empty());
    }

    #[test]
    fn test_open_failure_schedules_retry() {
        let (mut m, wire) = manager();
        wire.borrow_mut().fail_open = true;
        m.set_interactive(true);
        assert!(matches!(
            m.state(),
            ConnectionState::Failed {
                kind: FailureKind::Transient,
                ..
            }
        ));
        assert_eq!(m.scheduler().delays(TimerKind::Reconnect).len(), 1);
    }

    #[test]
    fn test_keepalive_pings_while_live() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let config = SessionConfig {
            ping_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let mut m = SessionConnectionManager::new(
            config,
            FakeConnector(wire.clone()),
            FakeScheduler::default(),
            RecordingWidget::default(),
        );
        m.connect();
        m.handle_event(SessionEvent::Opened {
            generation: m.generation(),
        });
        let ok = frame(&m, r#"{"type":"auth_ok"}"#);
        m.handle_event(ok);

        fire(&mut m, TimerKind::Keepalive);
        assert_eq!(wire.borrow().sent.last().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(m.scheduler().delays(TimerKind::Keepalive).len(), 1);

        let pong = frame(&m, r#"{"type":"pong"}"#);
        m.handle_event(pong);
        assert_eq!(m.state(), &ConnectionState::Live);

        let event = closed(&m);
        m.handle_event(event);
        assert!(m.scheduler().delays(TimerKind::Keepalive).is_empty());
    }
}
