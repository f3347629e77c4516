//! Bridge between the terminal widget and the PTY channel
//!
//! Outbound: local keystrokes, pastes and viewport changes become
//! `input`/`resize` frames. Inbound: remote output goes to the widget
//! byte for byte.

use crate::core::protocol::Message;
use crate::core::reconnect::ConnectionState;
use crate::ui::keymapper::InputModes;

/// Terminal dimensions in character cells
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub rows: u16,
    pub cols: u16,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// The visual terminal the remote PTY is rendered into
pub trait TerminalWidget {
    /// Render raw output bytes
    fn write(&mut self, bytes: &[u8]);

    fn clear(&mut self);

    /// Last known dimensions
    fn viewport(&self) -> Viewport;

    /// Re-measure the available space and return the fresh dimensions
    fn fit(&mut self) -> Viewport;

    /// Show the channel state to the user
    fn show_status(&mut self, state: &ConnectionState);

    /// One-line informational notice (reconnect scheduling and the like)
    fn notice(&mut self, text: &str);
}

/// Events reported by the widget
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WidgetEvent {
    /// Keystroke or paste bytes
    Input(Vec<u8>),
    /// The widget was resized
    Resize(Viewport),
    /// The interactive view became visible
    Activated,
}

pub struct DisplayAdapter<W: TerminalWidget> {
    widget: W,
    modes: InputModes,
}

impl<W: TerminalWidget> DisplayAdapter<W> {
    pub fn new(widget: W) -> Self {
        Self {
            widget,
            modes: InputModes::default(),
        }
    }

    /// Write remote output verbatim
    pub fn render_output(&mut self, data: &str) {
        let bytes = data.as_bytes();
        self.modes.observe(bytes);
        self.widget.write(bytes);
    }

    /// Turn a widget event into the frame it should produce.
    ///
    /// Activation re-fits first: the widget's size may be stale while the
    /// view was hidden.
    pub fn translate(&mut self, event: WidgetEvent) -> Option<Message> {
        match event {
            WidgetEvent::Input(bytes) if bytes.is_empty() => None,
            WidgetEvent::Input(bytes) => Some(Message::input(&bytes)),
            WidgetEvent::Resize(Viewport { rows, cols }) => Some(Message::Resize { rows, cols }),
            WidgetEvent::Activated => {
                let Viewport { rows, cols } = self.widget.fit();
                Some(Message::Resize { rows, cols })
            }
        }
    }

    /// Resize frame for the current widget size
    pub fn resize_message(&self) -> Message {
        let Viewport { rows, cols } = self.widget.viewport();
        Message::Resize { rows, cols }
    }

    pub fn modes(&self) -> &InputModes {
        &self.modes
    }

    #[cfg(test)]
    pub fn widget(&self) -> &W {
        &self.widget
    }

    pub fn widget_mut(&mut self) -> &mut W {
        &mut self.widget
    }
}
