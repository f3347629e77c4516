//! WebSocket transport for the PTY channel
//!
//! Each channel generation gets its own worker thread. The worker owns the
//! socket and reports everything it sees as [`SessionEvent`]s tagged with
//! the generation it was opened for; the main thread only ever pushes
//! outbound frames into a queue.

use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message as WsMessage, WebSocket};

use crate::app::AppEvent;
use crate::core::session::SessionEvent;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid channel URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported server scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Failed to spawn transport worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("Transport is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// An open (or opening) channel
pub trait Transport {
    fn send(&mut self, frame: String) -> Result<()>;

    /// Start closing; a `Closed` event follows
    fn close(&mut self);
}

/// Opens transports. Completion and traffic are reported as events.
pub trait Connector {
    type Transport: Transport;

    fn open(&mut self, generation: u64) -> Result<Self::Transport>;
}

/// Path of the PTY endpoint on the server
const TERMINAL_PATH: &str = "/ws/terminal";

/// How long a worker blocks in a read before checking its outbound queue
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Derive the channel URL from the HTTP server base
pub fn channel_url(server: &str) -> Result<String> {
    let mut url = url::Url::parse(server).map_err(|source| TransportError::InvalidUrl {
        url: server.to_string(),
        source,
    })?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path(TERMINAL_PATH);
    url.set_query(None);
    Ok(url.to_string())
}

enum Outbound {
    Frame(String),
    Close,
}

/// Handle to one worker's socket
pub struct WsTransport {
    generation: u64,
    outbound: Sender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&mut self, frame: String) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        debug!("Closing channel generation {}", self.generation);
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Opens WebSocket channels to a fixed URL
pub struct WsConnector {
    url: String,
    events: Sender<AppEvent>,
}

impl WsConnector {
    pub fn new(url: String, events: Sender<AppEvent>) -> Self {
        Self { url, events }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&mut self, generation: u64) -> Result<WsTransport> {
        let (tx, rx) = mpsc::channel();
        let url = self.url.clone();
        let events = self.events.clone();

        thread::Builder::new()
            .name(format!("ws-{}", generation))
            .spawn(move || run_socket(&url, generation, rx, &events))
            .map_err(TransportError::Spawn)?;

        Ok(WsTransport {
            generation,
            outbound: tx,
        })
    }
}

fn run_socket(url: &str, generation: u64, outbound: Receiver<Outbound>, events: &Sender<AppEvent>) {
    let post = |event: SessionEvent| events.send(AppEvent::Session(event)).is_ok();

    info!("Connecting to {} (generation {})", url, generation);
    let mut socket = match tungstenite::connect(url) {
        Ok((socket, _response)) => socket,
        Err(e) => {
            warn!("Connection to {} failed: {}", url, e);
            post(SessionEvent::TransportError {
                generation,
                message: e.to_string(),
            });
            post(SessionEvent::Closed { generation });
            return;
        }
    };

    let timeout = match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => set_poll_timeout(stream),
        MaybeTlsStream::Rustls(stream) => set_poll_timeout(&stream.sock),
        _ => Ok(()),
    };
    if let Err(e) = timeout {
        warn!("Failed to set socket read timeout: {}", e);
    }

    if !post(SessionEvent::Opened { generation }) {
        return;
    }

    pump(&mut socket, generation, &outbound, &post);

    debug!("Channel generation {} closed", generation);
    post(SessionEvent::Closed { generation });
}

fn set_poll_timeout(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(POLL_INTERVAL))
}

/// Move frames both ways until either side closes
fn pump<S, F>(socket: &mut WebSocket<S>, generation: u64, outbound: &Receiver<Outbound>, post: &F)
where
    S: io::Read + io::Write,
    F: Fn(SessionEvent) -> bool,
{
    loop {
        loop {
            match outbound.try_recv() {
                Ok(Outbound::Frame(frame)) => {
                    if let Err(e) = socket.send(WsMessage::Text(frame)) {
                        post(SessionEvent::TransportError {
                            generation,
                            message: e.to_string(),
                        });
                        return;
                    }
                }
                Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(WsMessage::Text(text)) => {
                if !post(SessionEvent::Frame {
                    generation,
                    text: text.to_string(),
                }) {
                    return;
                }
            }
            Ok(WsMessage::Close(_)) => return,
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => return,
            Err(e) => {
                post(SessionEvent::TransportError {
                    generation,
                    message: e.to_string(),
                });
                return;
            }
        }
    }
}
