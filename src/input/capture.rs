//! Translation of local input into browser commands
//!
//! Pure functions. Coordinates are relative to the sink's rendered box with
//! no scale correction; callers own any mismatch between the sink's on-screen
//! size and the remote viewport.

use super::types::{
    Captured, ClipboardEvent, CommandMessage, KeyEvent, PointerEvent, SinkBounds, WheelEvent,
};

fn to_pixel(value: f64) -> i32 {
    value.round() as i32
}

/// Click relative to the sink's top-left corner
pub fn pointer_click(event: PointerEvent, bounds: SinkBounds) -> Captured {
    Captured {
        message: CommandMessage::Click {
            x: to_pixel(event.client_x - bounds.left),
            y: to_pixel(event.client_y - bounds.top),
        },
        suppress_default: false,
    }
}

/// One `type` command per keystroke
pub fn key_press(event: KeyEvent) -> Captured {
    Captured {
        message: CommandMessage::Type { text: event.key },
        suppress_default: true,
    }
}

/// The whole pasted text as a single `type` command
pub fn paste(event: ClipboardEvent) -> Captured {
    Captured {
        message: CommandMessage::Type { text: event.text },
        suppress_default: true,
    }
}

pub fn wheel(event: WheelEvent) -> Captured {
    Captured {
        message: CommandMessage::Scroll {
            x: to_pixel(event.delta_x),
            y: to_pixel(event.delta_y),
        },
        suppress_default: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_relative_to_sink() {
        let captured = pointer_click(
            PointerEvent {
                client_x: 130.0,
                client_y: 350.0,
            },
            SinkBounds::new(10.0, 10.0, 1280.0, 720.0),
        );

        assert_eq!(
            serde_json::to_string(&captured.message).unwrap(),
            r#"{"command":"click","params":{"x":120,"y":340}}"#
        );
        assert!(!captured.suppress_default);
    }

    #[test]
    fn test_click_rounds_to_pixels() {
        let captured = pointer_click(
            PointerEvent {
                client_x: 20.6,
                client_y: 5.2,
            },
            SinkBounds::new(0.5, 0.0, 100.0, 100.0),
        );
        assert_eq!(captured.message, CommandMessage::Click { x: 20, y: 5 });
    }

    #[test]
    fn test_key_press_suppresses_default() {
        let captured = key_press(KeyEvent {
            key: "a".to_string(),
        });
        assert_eq!(
            captured.message,
            CommandMessage::Type {
                text: "a".to_string()
            }
        );
        assert!(captured.suppress_default);
    }

    #[test]
    fn test_paste_is_single_message() {
        let captured = paste(ClipboardEvent {
            text: "hello world\nsecond line".to_string(),
        });
        assert_eq!(
            captured.message,
            CommandMessage::Type {
                text: "hello world\nsecond line".to_string()
            }
        );
        assert!(captured.suppress_default);
    }

    #[test]
    fn test_wheel() {
        let captured = wheel(WheelEvent {
            delta_x: 0.0,
            delta_y: 99.6,
        });
        assert_eq!(captured.message, CommandMessage::Scroll { x: 0, y: 100 });
    }
}
