//! Application state and the main event loop
//!
//! The main thread owns everything. Worker threads (one per WebSocket
//! generation, one per HTTP request) only post [`AppEvent`]s; the loop
//! drains them, fires due timers and polls the keyboard.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::session::{SessionConnectionManager, SessionEvent};
use crate::core::timer::TimerQueue;
use crate::core::transport::{channel_url, WsConnector};
use crate::exec::api::{ApiClient, ApiError, CommandList, ExecutionResult, SessionInfo};
use crate::exec::pipeline::{render, ExecutionPipeline, HttpExecutor, Rejection, Rendered, Submission};
use crate::history::{HistoryBuffer, Recall};
use crate::ui::display::{TerminalWidget, WidgetEvent};
use crate::ui::terminal::{Console, CrosstermWidget};
use crate::ui::{KeyMapper, PromptLine};

/// Longest the loop sleeps waiting for input
const POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Supported language tags and their prompt symbols
pub const LANGUAGES: &[(&str, &str)] = &[("sh", "$"), ("py", ">>>"), ("js", ">"), ("java", "java>")];

pub fn prompt_symbol(language: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|(tag, _)| *tag == language)
        .map(|(_, symbol)| *symbol)
}

/// Everything worker threads report back to the main loop
#[derive(Debug)]
pub enum AppEvent {
    Session(SessionEvent),
    ExecutionFinished(Result<ExecutionResult, ApiError>),
    SessionInfo(Result<Option<SessionInfo>, ApiError>),
    Commands(Result<Option<CommandList>, ApiError>),
    SessionReset(Result<bool, ApiError>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Prompt,
    Interactive,
}

/// Transcript output that waits while the interactive view is in front
enum ConsoleLine {
    Result(Rendered),
    Info(String),
    Error(String),
}

type Session = SessionConnectionManager<WsConnector, TimerQueue, CrosstermWidget>;

pub struct App {
    config: Config,
    api: ApiClient,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
    pipeline: ExecutionPipeline<HttpExecutor>,
    /// Created on first entry to interactive mode
    session: Option<Session>,
    console: Console,
    line: PromptLine,
    language: String,
    mode: Mode,
    /// Ctrl+B seen in interactive mode
    prefix_pending: bool,
    /// `:reset` is waiting for y/N
    confirm_reset: bool,
    deferred: Vec<ConsoleLine>,
    last_output: Option<String>,
    quit: bool,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let (events_tx, events_rx) = mpsc::channel();
        let api = ApiClient::new(&config.server, &config.token)?;

        let history = match config.history_path() {
            Some(path) => HistoryBuffer::open(path, config.history.capacity),
            None => HistoryBuffer::in_memory(config.history.capacity),
        };
        let pipeline = ExecutionPipeline::new(HttpExecutor::new(api.clone(), events_tx.clone()), history);

        let language = if prompt_symbol(&config.language).is_some() {
            config.language.clone()
        } else {
            warn!("Unknown language '{}', using sh", config.language);
            "sh".to_string()
        };

        Ok(Self {
            config,
            api,
            events_tx,
            events_rx,
            pipeline,
            session: None,
            console: Console::new(),
            line: PromptLine::new(),
            language,
            mode: Mode::Prompt,
            prefix_pending: false,
            confirm_reset: false,
            deferred: Vec::new(),
            last_output: None,
            quit: false,
        })
    }

    pub fn run(&mut self, start_interactive: bool) -> anyhow::Result<()> {
        self.console.init()?;
        self.console.info(&format!(
            "ptylink {} | {} | :help for commands",
            env!("CARGO_PKG_VERSION"),
            self.config.server
        ))?;

        if start_interactive {
            self.enter_interactive()?;
        } else {
            self.draw_prompt()?;
        }

        let result = self.main_loop();

        if let Some(session) = self.session.as_mut() {
            session.shutdown();
        }
        self.console.cleanup()?;
        result
    }

    fn main_loop(&mut self) -> anyhow::Result<()> {
        while !self.quit {
            self.drain_events()?;
            self.fire_timers();

            if event::poll(self.poll_timeout())? {
                let evt = event::read()?;
                self.handle_terminal_event(evt)?;
            }
        }
        info!("Exiting");
        Ok(())
    }

    fn poll_timeout(&self) -> Duration {
        let deadline = self
            .session
            .as_ref()
            .and_then(|s| s.scheduler().next_deadline());
        match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_TIMEOUT),
            None => POLL_TIMEOUT,
        }
    }

    fn fire_timers(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for fired in session.scheduler_mut().pop_due(Instant::now()) {
            session.handle_event(SessionEvent::Timer {
                kind: fired.kind,
                generation: fired.generation,
            });
        }
    }

    fn drain_events(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AppEvent::Session(event) => match self.session.as_mut() {
                    Some(session) => session.handle_event(event),
                    None => debug!("Channel event without a session: {:?}", event),
                },
                AppEvent::ExecutionFinished(outcome) => {
                    if let Some(completed) = self.pipeline.complete(outcome) {
                        let rendered = render(&completed.result);
                        self.last_output = Some(rendered.text.clone());
                        self.emit(ConsoleLine::Result(rendered))?;
                    }
                }
                AppEvent::SessionInfo(Ok(Some(info))) => {
                    for line in describe_session(&info) {
                        self.emit(ConsoleLine::Info(line))?;
                    }
                }
                AppEvent::SessionInfo(Ok(None)) => {
                    self.emit(ConsoleLine::Error("session info unavailable".to_string()))?;
                }
                AppEvent::Commands(Ok(Some(list))) => {
                    self.emit(ConsoleLine::Info(describe_commands(&list)))?;
                }
                AppEvent::Commands(Ok(None)) => {
                    self.emit(ConsoleLine::Error("command list unavailable".to_string()))?;
                }
                AppEvent::SessionReset(Ok(true)) => {
                    self.pipeline.history_mut().reset_cursor();
                    self.last_output = None;
                    if self.mode == Mode::Prompt {
                        self.console.clear_screen()?;
                    }
                    self.emit(ConsoleLine::Info("session reset".to_string()))?;
                }
                AppEvent::SessionReset(Ok(false)) => {
                    self.emit(ConsoleLine::Error("session reset refused".to_string()))?;
                }
                AppEvent::SessionInfo(Err(e))
                | AppEvent::Commands(Err(e))
                | AppEvent::SessionReset(Err(e)) => {
                    warn!("Request failed: {}", e);
                    self.emit(ConsoleLine::Error(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Print to the transcript now, or once prompt mode is back
    fn emit(&mut self, line: ConsoleLine) -> anyhow::Result<()> {
        if self.mode == Mode::Interactive {
            self.deferred.push(line);
            return Ok(());
        }
        self.print_line(&line)?;
        self.draw_prompt()
    }

    fn print_line(&self, line: &ConsoleLine) -> anyhow::Result<()> {
        match line {
            ConsoleLine::Result(rendered) => self.console.print_result(rendered)?,
            ConsoleLine::Info(text) => self.console.info(text)?,
            ConsoleLine::Error(text) => self.console.error(text)?,
        }
        Ok(())
    }

    fn draw_prompt(&self) -> anyhow::Result<()> {
        let symbol = prompt_symbol(&self.language).unwrap_or("$");
        self.console.draw_prompt(symbol, &self.line)?;
        Ok(())
    }

    fn handle_terminal_event(&mut self, evt: Event) -> anyhow::Result<()> {
        match (self.mode, evt) {
            (_, Event::Key(key)) if key.kind != KeyEventKind::Press => Ok(()),
            (Mode::Prompt, Event::Key(key)) => self.handle_prompt_key(key),
            (Mode::Interactive, Event::Key(key)) => self.handle_interactive_key(key),
            (Mode::Prompt, Event::Paste(text)) => {
                self.line.insert_str(&text);
                self.draw_prompt()
            }
            (Mode::Interactive, Event::Paste(text)) => {
                if let Some(session) = self.session.as_mut() {
                    let bytes = session.display().modes().wrap_paste(&text);
                    if let Err(e) = session.handle_widget_event(WidgetEvent::Input(bytes)) {
                        debug!("Paste dropped: {}", e);
                    }
                }
                Ok(())
            }
            (Mode::Interactive, Event::Resize(cols, rows)) => {
                info!("Resize: {}x{}", cols, rows);
                if let Some(session) = self.session.as_mut() {
                    let viewport = session.display_mut().widget_mut().fit();
                    if let Err(e) = session.handle_widget_event(WidgetEvent::Resize(viewport)) {
                        debug!("Resize not sent: {}", e);
                    }
                }
                Ok(())
            }
            (Mode::Prompt, Event::Resize(..)) => self.draw_prompt(),
            _ => Ok(()),
        }
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) -> anyhow::Result<()> {
        if self.confirm_reset {
            self.confirm_reset = false;
            if matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y')) {
                self.console.info("resetting session...")?;
                self.spawn_request("session-reset", |api| api.reset_session(), AppEvent::SessionReset);
            } else {
                self.console.info("cancelled")?;
            }
            return self.draw_prompt();
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let newline = key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SHIFT);
        match key.code {
            KeyCode::Enter if newline => self.line.insert_newline(),
            KeyCode::Char('j') if ctrl => self.line.insert_newline(),
            KeyCode::Enter => return self.submit_line(),
            KeyCode::Char('d') if ctrl => {
                if self.line.is_empty() {
                    self.quit = true;
                    return Ok(());
                }
                self.line.delete();
            }
            KeyCode::Char('c') if ctrl => {
                self.line.take();
                self.pipeline.history_mut().reset_cursor();
            }
            KeyCode::Char('l') if ctrl => self.console.clear_screen()?,
            KeyCode::Char('u') if ctrl => self.line.kill_to_start(),
            KeyCode::Char('a') if ctrl => self.line.home(),
            KeyCode::Char('e') if ctrl => self.line.end(),
            KeyCode::Char(c) if !ctrl => self.line.insert(c),
            KeyCode::Backspace => {
                self.line.backspace();
            }
            KeyCode::Delete => {
                self.line.delete();
            }
            KeyCode::Left => self.line.move_left(),
            KeyCode::Right => self.line.move_right(),
            KeyCode::Home => self.line.home(),
            KeyCode::End => self.line.end(),
            // History only from the outer rows; inside multi-line input
            // the arrows move between rows
            KeyCode::Up => {
                if !self.line.move_up() {
                    if let Some(text) = self.pipeline.history_mut().recall(Recall::Previous) {
                        self.line.set(&text);
                    }
                }
            }
            KeyCode::Down => {
                if !self.line.move_down() {
                    if let Some(text) = self.pipeline.history_mut().recall(Recall::Next) {
                        self.line.set(&text);
                    }
                }
            }
            _ => {}
        }
        self.draw_prompt()
    }

    fn submit_line(&mut self) -> anyhow::Result<()> {
        let symbol = prompt_symbol(&self.language).unwrap_or("$");
        match classify_line(&self.line.text(), self.pipeline.is_busy()) {
            LineAction::Busy => {
                self.console.error("a command is still running")?;
                self.draw_prompt()
            }
            LineAction::Command(command) => {
                self.console.print_command(symbol, &self.line)?;
                self.line.take();
                self.pipeline.history_mut().reset_cursor();
                self.run_command(&command)?;
                if self.mode == Mode::Prompt && !self.quit {
                    self.draw_prompt()?;
                }
                Ok(())
            }
            LineAction::Execute => {
                self.console.print_command(symbol, &self.line)?;
                let text = self.line.take();
                match self.pipeline.submit(&self.language, &text) {
                    Submission::Accepted(request) => debug!("Submitted request {}", request.id),
                    Submission::Rejected(Rejection::Busy) => {
                        self.console.error("a command is still running")?;
                    }
                    Submission::Rejected(Rejection::Empty) => {
                        self.pipeline.history_mut().reset_cursor();
                    }
                }
                self.draw_prompt()
            }
        }
    }

    fn run_command(&mut self, command: &str) -> anyhow::Result<()> {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or("");
        let arg = parts.next();

        match (name, arg) {
            ("lang", None) => {
                let tags: Vec<&str> = LANGUAGES.iter().map(|(tag, _)| *tag).collect();
                self.console
                    .info(&format!("language: {} (available: {})", self.language, tags.join(", ")))?;
            }
            ("lang", Some(tag)) => {
                if prompt_symbol(tag).is_some() {
                    info!("Language switched to {}", tag);
                    self.language = tag.to_string();
                } else {
                    self.console.error(&format!("unknown language '{}'", tag))?;
                }
            }
            ("session", _) => {
                self.spawn_request("session-info", |api| api.session_info(), AppEvent::SessionInfo);
            }
            ("commands", _) => {
                self.spawn_request("commands", |api| api.commands(), AppEvent::Commands);
            }
            ("reset", _) => {
                self.confirm_reset = true;
                self.console.info("Reset the remote session? (y/N)")?;
            }
            ("clear", _) => self.console.clear_screen()?,
            ("copy", _) => match self.last_output.as_deref() {
                Some(text) => match arboard::Clipboard::new().and_then(|mut c| c.set_text(text)) {
                    Ok(()) => self.console.info("copied last output")?,
                    Err(e) => self.console.error(&format!("clipboard unavailable: {}", e))?,
                },
                None => self.console.info("nothing to copy")?,
            },
            ("pty", _) => self.enter_interactive()?,
            ("quit" | "q" | "exit", _) => self.quit = true,
            ("help", _) | ("", _) => {
                for line in HELP {
                    self.console.info(line)?;
                }
            }
            (other, _) => self.console.error(&format!("unknown command ':{}'", other))?,
        }
        Ok(())
    }

    fn spawn_request<T, F>(&self, name: &str, call: F, wrap: fn(Result<T, ApiError>) -> AppEvent)
    where
        T: Send + 'static,
        F: FnOnce(&ApiClient) -> Result<T, ApiError> + Send + 'static,
    {
        let api = self.api.clone();
        let events = self.events_tx.clone();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = events.send(wrap(call(&api)));
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn {} request: {}", name, e);
        }
    }

    fn enter_interactive(&mut self) -> anyhow::Result<()> {
        if self.session.is_none() {
            let url = match channel_url(&self.config.server) {
                Ok(url) => url,
                Err(e) => {
                    self.console.error(&e.to_string())?;
                    return self.draw_prompt();
                }
            };
            info!("PTY channel: {}", url);
            self.session = Some(SessionConnectionManager::new(
                self.config.session(),
                WsConnector::new(url, self.events_tx.clone()),
                TimerQueue::new(),
                CrosstermWidget::new(),
            ));
        }

        self.console
            .info("interactive mode: Ctrl+B d returns, Ctrl+B r reconnects")?;
        self.mode = Mode::Interactive;
        self.prefix_pending = false;
        if let Some(session) = self.session.as_mut() {
            session.display_mut().widget_mut().set_visible(true);
            session.set_interactive(true);
        }
        Ok(())
    }

    fn leave_interactive(&mut self) -> anyhow::Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.set_interactive(false);
            session.display_mut().widget_mut().set_visible(false);
        }
        self.mode = Mode::Prompt;
        self.prefix_pending = false;
        self.console.info("")?;
        if let Some(session) = self.session.as_ref() {
            self.console.info(&format!("channel: {}", session.state()))?;
        }

        for line in std::mem::take(&mut self.deferred) {
            self.print_line(&line)?;
        }
        self.draw_prompt()
    }

    fn handle_interactive_key(&mut self, key: KeyEvent) -> anyhow::Result<()> {
        let is_prefix =
            key.code == KeyCode::Char('b') && key.modifiers.contains(KeyModifiers::CONTROL);

        if self.prefix_pending {
            self.prefix_pending = false;
            match key.code {
                KeyCode::Char('d') => return self.leave_interactive(),
                KeyCode::Char('r') => {
                    if let Some(session) = self.session.as_mut() {
                        session.manual_reconnect();
                    }
                }
                KeyCode::Char('b') => self.send_bytes(vec![0x02]),
                _ => debug!("Unbound prefix key: {:?}", key.code),
            }
            return Ok(());
        }

        if is_prefix {
            self.prefix_pending = true;
            return Ok(());
        }

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        if let Some(bytes) = KeyMapper::map(&key, session.display().modes()) {
            self.send_bytes(bytes);
        }
        Ok(())
    }

    fn send_bytes(&mut self, bytes: Vec<u8>) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.handle_widget_event(WidgetEvent::Input(bytes)) {
                debug!("Input dropped: {}", e);
            }
        }
    }
}

/// What Enter does with the current input
#[derive(Debug, PartialEq, Eq)]
enum LineAction {
    /// Single-row `:name args`
    Command(String),
    /// Source for the pipeline, possibly blank
    Execute,
    /// A request is outstanding; the input stays where it is
    Busy,
}

fn classify_line(text: &str, busy: bool) -> LineAction {
    let trimmed = text.trim();
    if !trimmed.contains('\n') {
        if let Some(command) = trimmed.strip_prefix(':') {
            return LineAction::Command(command.to_string());
        }
    }
    if busy && !trimmed.is_empty() {
        LineAction::Busy
    } else {
        LineAction::Execute
    }
}

const HELP: &[&str] = &[
    "Keys: Enter runs, Alt+Enter or Ctrl+J adds a line, Up/Down recall history",
    "Commands:",
    "  :lang [sh|py|js|java]  show or switch the language",
    "  :session               show remote session info",
    "  :commands              list allowed commands",
    "  :reset                 reset the remote session",
    "  :copy                  copy the last output",
    "  :clear                 clear the screen",
    "  :pty                   interactive terminal (Ctrl+B d to return)",
    "  :quit                  exit (also Ctrl+D)",
];

fn describe_session(info: &SessionInfo) -> Vec<String> {
    let user = match &info.user_id {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    vec![
        format!("cwd: {}", info.cwd.as_deref().unwrap_or("-")),
        format!("user: {}", user),
    ]
}

fn describe_commands(list: &CommandList) -> String {
    if list.allow_all {
        "all commands allowed".to_string()
    } else if list.commands.is_empty() {
        "no allowed commands".to_string()
    } else {
        format!(
            "allowed commands ({}): {}",
            list.commands.len(),
            list.commands.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prompt_symbols() {
        assert_eq!(prompt_symbol("sh"), Some("$"));
        assert_eq!(prompt_symbol("py"), Some(">>>"));
        assert_eq!(prompt_symbol("js"), Some(">"));
        assert_eq!(prompt_symbol("java"), Some("java>"));
        assert_eq!(prompt_symbol("ruby"), None);
    }

    #[test]
    fn test_busy_keeps_typed_input() {
        let mut line = PromptLine::new();
        line.set("ls -la");
        assert_eq!(classify_line(&line.text(), true), LineAction::Busy);
        assert_eq!(line.text(), "ls -la");
        assert_eq!(classify_line(&line.text(), false), LineAction::Execute);
    }

    #[test]
    fn test_commands_run_while_busy() {
        assert_eq!(
            classify_line("  :lang py ", true),
            LineAction::Command("lang py".to_string())
        );
        // Blank input never reports busy
        assert_eq!(classify_line(" \n ", true), LineAction::Execute);
    }

    #[test]
    fn test_multiline_input_is_never_a_command() {
        assert_eq!(classify_line(":x\nprint(1)", false), LineAction::Execute);
    }

    #[test]
    fn test_describe_commands() {
        let all = CommandList {
            allow_all: true,
            commands: vec!["ls".to_string()],
        };
        assert_eq!(describe_commands(&all), "all commands allowed");
        assert_eq!(describe_commands(&CommandList::default()), "no allowed commands");

        let some = CommandList {
            allow_all: false,
            commands: vec!["ls".to_string(), "cat".to_string()],
        };
        assert_eq!(describe_commands(&some), "allowed commands (2): ls, cat");
    }

    #[test]
    fn test_describe_session() {
        let info = SessionInfo {
            cwd: Some("/home/u".to_string()),
            user_id: Some(serde_json::json!(42)),
        };
        assert_eq!(describe_session(&info), vec!["cwd: /home/u", "user: 42"]);

        let empty = SessionInfo {
            cwd: None,
            user_id: None,
        };
        assert_eq!(describe_session(&empty), vec!["cwd: -", "user: -"]);
    }
}
