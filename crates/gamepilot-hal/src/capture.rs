//! Generic `ScreenCapture` trait for frame-acquisition backends.

use gamepilot_types::{Frame, PilotError};

/// A source of screen frames (emulator mirror, window grabber, adb
/// screencap, …).
///
/// The control loop asks for a fresh frame on every observation and never
/// caches frames beyond a single estimation call.
pub trait ScreenCapture: Send + Sync {
    /// Stable identifier for this source, e.g. `"emulator_window"`.
    fn source(&self) -> &str;

    /// Capture and return the current screen.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Capture`] if the frame cannot be acquired (window
    /// minimised, device disconnected, …).
    fn current_frame(&mut self) -> Result<Frame, PilotError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SolidCapture {
        color: [u8; 3],
    }

    impl ScreenCapture for SolidCapture {
        fn source(&self) -> &str {
            "solid"
        }

        fn current_frame(&mut self) -> Result<Frame, PilotError> {
            let color = self.color;
            Ok(Frame::from_fn(2, 2, move |_, _| color))
        }
    }

    #[test]
    fn mock_capture_returns_frame() {
        let mut cap = SolidCapture { color: [9, 8, 7] };
        assert_eq!(cap.source(), "solid");
        let frame = cap.current_frame().unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.rgb(1, 1), [9, 8, 7]);
    }
}
