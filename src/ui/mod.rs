//! User interface and input handling.
//!
//! - **keymapper**: Keyboard input to PTY byte sequence mapping
//! - **display**: Widget seam between the terminal and the PTY channel
//! - **prompt**: Multi-line editor for one-shot commands
//! - **terminal**: crossterm-backed console and interactive widget

pub mod display;
pub mod keymapper;
pub mod prompt;
pub mod terminal;

pub use keymapper::KeyMapper;
pub use prompt::PromptLine;
