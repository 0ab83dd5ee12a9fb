//! Config module.
//! Manages I/O for handsfree.json (recognition calibration, thresholds, timings).
//! Uses serde for JSON serialization; every field has a default so partial files work.
//! Auto-generates the file with defaults if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Height every captured frame is downsampled to before recognition.
    pub scaled_height: u32,
    /// Width and height of the reference piece images.
    pub reference_dim: u32,
    /// Directory holding `{kind}-{color}-{tile}.png` reference images.
    pub assets_dir: PathBuf,
    pub recognition_interval_ms: u64,
    pub board_retry_delay_ms: u64,
    pub text_queue_capacity: usize,
    /// Pause between the individual mouse events of a drag.
    pub drag_pause_ms: u64,
    pub grid: GridCalibration,
    pub classifier: ClassifierThresholds,
    /// Screen-space board bounds. When set, grid detection is skipped.
    pub fixed_board: Option<BoardBounds>,
    /// Extra `[heard, meant]` phrase pairs for the command buffer.
    pub substitutions: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scaled_height: 720,
            reference_dim: 33,
            assets_dir: PathBuf::from("assets/pieces"),
            recognition_interval_ms: 500,
            board_retry_delay_ms: 1500,
            text_queue_capacity: 16,
            drag_pause_ms: 60,
            grid: GridCalibration::default(),
            classifier: ClassifierThresholds::default(),
            fixed_board: None,
            substitutions: Vec::new(),
        }
    }
}

/// Tuning for the checker-pattern grid locator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridCalibration {
    /// Max gray-level difference for two pixels to belong to the same run.
    pub run_tolerance: u8,
    /// Max length difference between the runs of a checker pattern.
    pub length_tolerance: u32,
    /// Added to the measured board size. Tuned per board theme.
    pub size_correction_px: f64,
    pub kde_bandwidth: f64,
}

impl Default for GridCalibration {
    fn default() -> Self {
        Self {
            run_tolerance: 0,
            length_tolerance: 3,
            size_correction_px: -1.0,
            kde_bandwidth: 1.0,
        }
    }
}

/// Mean-squared-error acceptance limits for piece classification.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Empty squares must match much more closely than pieces.
    pub empty_max_error: f64,
    pub piece_max_error: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            empty_max_error: 400.0,
            piece_max_error: 8000.0,
        }
    }
}

/// Board rectangle in screen pixels, as measured during calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardBounds {
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

impl Config {
    /// Loads the config at `path`, writing a default one first if it doesn't exist.
    pub fn load_or_create(path: &Path) -> Result<Config> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!(path = %path.display(), "wrote default config");
            return Ok(config);
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, text).with_context(|| format!("Failed to write config {}", path.display()))
    }

    pub fn recognition_interval(&self) -> Duration {
        Duration::from_millis(self.recognition_interval_ms)
    }

    pub fn board_retry_delay(&self) -> Duration {
        Duration::from_millis(self.board_retry_delay_ms)
    }

    pub fn drag_pause(&self) -> Duration {
        Duration::from_millis(self.drag_pause_ms)
    }
}
