//! Display Drivers
//!
//! The two-row, 20-column display contract shared by validation and playback.
//!
//! Animation code only ever sees [`DisplayDriver`]. Validation hands it a
//! [`HeadlessDisplay`] that records frames and never sleeps; playback hands it
//! a [`ConsoleDisplay`] (the `simulator` device) that paces frames in real
//! time. Because the contract is identical, code that validated is exactly
//! the code that plays.

pub mod capture;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

pub use capture::{CaptureError, CapturingDisplay, FrameCapture, FrameStats};

/// Columns per display row
pub const DISPLAY_WIDTH: usize = 20;

/// Rows on the display
pub const DISPLAY_ROWS: usize = 2;

/// Device name of the console simulator
pub const SIMULATOR_DEVICE: &str = "simulator";

/// Display driver contract
///
/// `write_frame` takes two rows; drivers normalize them to [`DISPLAY_WIDTH`].
pub trait DisplayDriver: Send {
    /// Show one frame
    fn write_frame(&mut self, line1: &str, line2: &str) -> io::Result<()>;

    /// Wait for the next frame tick
    fn frame_sleep(&mut self, seconds: f64);

    /// Blank both rows
    fn clear(&mut self) -> io::Result<()> {
        let blank = " ".repeat(DISPLAY_WIDTH);
        self.write_frame(&blank, &blank)
    }

    /// Frames per second this driver is paced for
    fn frame_rate(&self) -> u32;
}

/// Display handle shared between the async controller and a blocking script run
pub type SharedDisplay = Arc<Mutex<dyn DisplayDriver>>;

/// Errors opening a display device
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Device name is not one this build can drive
    #[error("Unsupported display device: {0} (only \"simulator\" is available)")]
    UnsupportedDevice(String),
}

/// Truncate or right-pad a row to exactly [`DISPLAY_WIDTH`] characters
#[must_use]
pub fn normalize_line(line: &str) -> String {
    let mut out: String = line
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(DISPLAY_WIDTH)
        .collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(DISPLAY_WIDTH - len));
    out
}

/// Center text within a row, the way status screens are laid out
#[must_use]
pub fn center_line(text: &str) -> String {
    let len = text.chars().count();
    if len >= DISPLAY_WIDTH {
        return normalize_line(text);
    }
    let left = (DISPLAY_WIDTH - len) / 2;
    normalize_line(&format!("{}{}", " ".repeat(left), text))
}

/// Open the display for a device name
pub fn open_display(
    device: &str,
    frame_rate: u32,
    preview: bool,
) -> Result<ConsoleDisplay, DisplayError> {
    if device == SIMULATOR_DEVICE {
        Ok(ConsoleDisplay::new(frame_rate, preview))
    } else {
        Err(DisplayError::UnsupportedDevice(device.to_string()))
    }
}

/// No-I/O stand-in used for validation
///
/// Records every frame and treats `frame_sleep` as a no-op.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    frame_rate: u32,
    frames: Vec<(String, String)>,
    sleeps: u64,
}

impl HeadlessDisplay {
    /// Create a headless display reporting the given tick rate
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate,
            frames: Vec::new(),
            sleeps: 0,
        }
    }

    /// Frames recorded so far
    #[must_use]
    pub fn frames(&self) -> &[(String, String)] {
        &self.frames
    }

    /// Take the recorded frames, leaving the display empty
    pub fn take_frames(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.frames)
    }

    /// Number of intercepted sleep calls
    #[must_use]
    pub fn sleep_calls(&self) -> u64 {
        self.sleeps
    }
}

impl DisplayDriver for HeadlessDisplay {
    fn write_frame(&mut self, line1: &str, line2: &str) -> io::Result<()> {
        self.frames
            .push((normalize_line(line1), normalize_line(line2)));
        Ok(())
    }

    fn frame_sleep(&mut self, _seconds: f64) {
        self.sleeps += 1;
    }

    fn clear(&mut self) -> io::Result<()> {
        // Clearing is not a frame the animation drew
        Ok(())
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
}

/// Console simulator
///
/// Paces frames with real sleeps and, when preview is on, renders each frame
/// to stderr framed by separator rows.
#[derive(Debug)]
pub struct ConsoleDisplay {
    frame_rate: u32,
    preview: bool,
    frames_written: u64,
}

impl ConsoleDisplay {
    /// Create a simulator display
    #[must_use]
    pub fn new(frame_rate: u32, preview: bool) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            preview,
            frames_written: 0,
        }
    }

    /// Total frames written since creation
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl DisplayDriver for ConsoleDisplay {
    fn write_frame(&mut self, line1: &str, line2: &str) -> io::Result<()> {
        self.frames_written += 1;
        if self.preview {
            let rule = "-".repeat(DISPLAY_WIDTH);
            let mut err = io::stderr().lock();
            writeln!(err, "{rule}")?;
            writeln!(err, "{}", normalize_line(line1))?;
            writeln!(err, "{}", normalize_line(line2))?;
            writeln!(err, "{rule}")?;
            err.flush()?;
        }
        Ok(())
    }

    fn frame_sleep(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
}
