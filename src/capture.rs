//! Screen capture module
//! Uses `xcap` for cross-platform screenshots of one monitor.
//! Frames are converted to grayscale and downsampled to a fixed height so the
//! grid search costs the same on every display; `Frame::scale` and
//! `Frame::origin` map back to global screen coordinates for the mouse.
//! Latency goal: 30-50ms.

use crate::error::HandsFreeError;
use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use std::env;
use std::fs;
use std::time::Instant;
use tracing::debug;
use xcap::Monitor;

/// A downsampled grayscale screenshot.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: GrayImage,
    /// Logical screen points per frame pixel.
    pub scale: f64,
    /// Global position of the captured monitor's top-left corner.
    pub origin: (f64, f64),
}

impl Frame {
    pub fn new(pixels: GrayImage, scale: f64) -> Self {
        Self { pixels, scale, origin: (0.0, 0.0) }
    }

    pub fn with_origin(mut self, x: f64, y: f64) -> Self {
        self.origin = (x, y);
        self
    }
}

/// Anything that can produce frames of the screen the board is on.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Frame>;
}

/// Captures a monitor with xcap.
/// Debug: Set env var `DEBUG_CAPTURE=1` to save every frame to `screenshots/debug_frame.png`.
/// Permissions note: On macOS, grant "Screen & System Audio Recording" permission to the terminal in System Settings > Privacy & Security.
pub struct XcapFrameSource {
    monitor_index: usize,
    scaled_height: u32,
}

impl XcapFrameSource {
    pub fn new(monitor_index: usize, scaled_height: u32) -> Self {
        Self { monitor_index, scaled_height }
    }
}

impl FrameSource for XcapFrameSource {
    fn capture(&self) -> Result<Frame> {
        let start = Instant::now();

        let monitors = Monitor::all()
            .context("Failed to enumerate monitors")?;

        let monitor = monitors
            .get(self.monitor_index)
            .cloned()
            .with_context(|| format!("Monitor {} not found ({} available)", self.monitor_index, monitors.len()))?;

        let screenshot_raw = monitor
            .capture_image()
            .context("Failed to capture image. On macOS, ensure the terminal has Screen Recording permission in System Settings > Privacy & Security > Screen & System Audio Recording")?;

        let screenshot = DynamicImage::ImageRgba8(screenshot_raw);
        if screenshot.dimensions() == (0, 0) {
            return Err(HandsFreeError::Capture {
                message: "captured empty screenshot - possible permission issue or no display".to_string(),
            }
            .into());
        }

        // The captured image is in physical pixels; mouse events use the
        // monitor's logical size and global position.
        let logical_height = monitor.height().context("Failed to read monitor height")?;
        let x = monitor.x().context("Failed to read monitor position")?;
        let y = monitor.y().context("Failed to read monitor position")?;
        let mut frame = downsample(&screenshot, self.scaled_height);
        frame.scale = logical_height as f64 / frame.pixels.height() as f64;
        let frame = frame.with_origin(x as f64, y as f64);

        if env::var_os("DEBUG_CAPTURE").is_some() {
            fs::create_dir_all("screenshots")
                .context("Failed to create screenshots/ debug directory")?;
            frame
                .pixels
                .save("screenshots/debug_frame.png")
                .context("Failed to save debug frame to screenshots/")?;
        }

        debug!(latency = ?start.elapsed(), width = frame.pixels.width(), "captured frame");
        Ok(frame)
    }
}

/// Converts to grayscale at `scaled_height`, keeping the aspect ratio. The
/// scale is relative to the input image, with the origin at zero.
pub fn downsample(image: &DynamicImage, scaled_height: u32) -> Frame {
    let (width, height) = image.dimensions();
    let scaled_height = scaled_height.max(1);
    let ratio = scaled_height as f64 / height.max(1) as f64;
    let scaled_width = ((width as f64 * ratio).round() as u32).max(1);
    let pixels = image
        .resize_exact(scaled_width, scaled_height, FilterType::Triangle)
        .to_luma8();
    Frame::new(pixels, height as f64 / scaled_height as f64)
}
