use serde::{Deserialize, Serialize};

/// Command sent to the remote browser over the control channel
///
/// ```json
/// {"command":"click","params":{"x":120,"y":340}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params", rename_all = "lowercase")]
pub enum CommandMessage {
    /// Click at viewport coordinates
    Click { x: i32, y: i32 },
    /// Type text into the focused element
    Type { text: String },
    /// Scroll the page by a delta
    Scroll { x: i32, y: i32 },
}

impl CommandMessage {
    pub fn name(&self) -> &'static str {
        match self {
            CommandMessage::Click { .. } => "click",
            CommandMessage::Type { .. } => "type",
            CommandMessage::Scroll { .. } => "scroll",
        }
    }
}

/// Rendered bounding box of the video sink, in the same space as pointer events
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SinkBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SinkBounds {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Pointer click at client coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub client_x: f64,
    pub client_y: f64,
}

/// Single keystroke; `key` is the key's printable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardEvent {
    pub text: String,
}

/// Wheel scroll delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelEvent {
    pub delta_x: f64,
    pub delta_y: f64,
}

/// Translation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub message: CommandMessage,
    /// Local default handling must be suppressed so input is not applied twice
    pub suppress_default: bool,
}
