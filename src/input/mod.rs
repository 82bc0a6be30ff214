//! Input capture: local input events to control-channel commands

pub mod capture;
pub mod types;

pub use capture::{key_press, paste, pointer_click, wheel};
pub use types::{
    Captured, ClipboardEvent, CommandMessage, KeyEvent, PointerEvent, SinkBounds, WheelEvent,
};
