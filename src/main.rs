//! ptylink - one-shot remote execution and interactive remote PTY sessions
//!
//! ptylink talks to an execution server over HTTP and WebSocket. At the
//! prompt each line is sent to `POST /api/execute` and its result printed
//! inline; `:pty` switches to a live remote terminal over `/ws/terminal`.
//!
//! # Quick Start
//!
//! ```text
//! ptylink -s http://host:8080 -t <token>     # prompt mode
//! ptylink -i                                 # straight into the remote PTY
//! ptylink -l py                              # start in Python
//! ```
//!
//! # Keybindings (interactive mode, Ctrl+B prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | d | Back to the prompt |
//! | r | Reconnect (clears the screen) |
//! | b | Send a literal Ctrl+B |

mod app;
mod config;
mod core;
mod exec;
mod history;
mod ui;

use std::env;
use std::sync::Mutex;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::{prompt_symbol, App};
use crate::config::{app_dir, Config, LOG_ENV};

/// Command-line overrides
#[derive(Debug, Default)]
struct Args {
    server: Option<String>,
    token: Option<String>,
    language: Option<String>,
    interactive: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("ptylink {}", VERSION);
}

fn print_help() {
    eprintln!("ptylink {} - remote execution and PTY client", VERSION);
    eprintln!();
    eprintln!("Usage: ptylink [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --server <URL>    Server base URL (default http://127.0.0.1:8080)");
    eprintln!("  -t, --token <TOKEN>   Identity token (or PTYLINK_TOKEN)");
    eprintln!("  -l, --lang <LANG>     Initial language: sh, py, js, java");
    eprintln!("  -i, --interactive     Start in the interactive terminal");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Prompt keys:");
    eprintln!("  Enter                 Run the input");
    eprintln!("  Alt+Enter, Ctrl+J     Start a new line (multi-line source)");
    eprintln!("  Up/Down               History, from the first or last line");
    eprintln!();
    eprintln!("Prompt commands:");
    eprintln!("  :lang <LANG>          Switch language");
    eprintln!("  :session              Show remote session info");
    eprintln!("  :commands             List allowed commands");
    eprintln!("  :reset                Reset the remote session");
    eprintln!("  :copy                 Copy the last output to the clipboard");
    eprintln!("  :clear                Clear the screen");
    eprintln!("  :pty                  Interactive terminal");
    eprintln!("  :quit                 Exit (also Ctrl+D on an empty line)");
    eprintln!();
    eprintln!("Interactive mode (Ctrl+B prefix):");
    eprintln!("  Ctrl+B, d             Back to the prompt");
    eprintln!("  Ctrl+B, r             Reconnect");
    eprintln!("  Ctrl+B, b             Send Ctrl+B");
    eprintln!();
    eprintln!("Configuration: ~/.ptylink/config.toml");
    eprintln!("Log file:      ~/.ptylink/ptylink.log (filter with {})", LOG_ENV);
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    let value = |i: &mut usize, name: &str| -> Result<String, String> {
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| format!("Missing {} argument", name))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--server" => parsed.server = Some(value(&mut i, "server")?),
            "-t" | "--token" => parsed.token = Some(value(&mut i, "token")?),
            "-l" | "--lang" => {
                let lang = value(&mut i, "language")?;
                if prompt_symbol(&lang).is_none() {
                    return Err(format!("Unknown language: {}", lang));
                }
                parsed.language = Some(lang);
            }
            "-i" | "--interactive" => parsed.interactive = true,
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to `~/.ptylink/ptylink.log`; stdout belongs to the terminal
fn init_logging(level: &str) {
    let log_path = app_dir()
        .map(|dir| dir.join("ptylink.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("ptylink.log"));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Command line wins over the config file
    let (mut config, load_error) = Config::load();
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(token) = args.token {
        config.token = token;
    }
    if let Some(language) = args.language {
        config.language = language;
    }

    init_logging(&config.log_level);
    info!("ptylink {} starting", VERSION);
    if let Some(e) = load_error {
        warn!("{:#}; using defaults", e);
    }
    info!("Server: {}", config.server);
    if config.token.is_empty() {
        info!("No identity token configured");
    }

    let mut app = App::new(config)?;
    app.run(args.interactive)
}
