//! Calibration module.
//! Detects the board once with the checker-pattern locator and stores its
//! screen bounds in handsfree.json, after which recognition skips grid
//! detection and uses `FixedGridLocator`.
//! Run via CLI flag --calibrate with the board visible on screen.

use crate::capture::{Frame, FrameSource};
use crate::config::{BoardBounds, Config};
use crate::grid::{GridGeometry, GridLocator, LocatedGrid};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Grid from calibrated global screen bounds; frame content is ignored.
#[derive(Clone, Copy, Debug)]
pub struct FixedGridLocator {
    bounds: BoardBounds,
}

impl FixedGridLocator {
    pub fn new(bounds: BoardBounds) -> Self {
        Self { bounds }
    }
}

impl GridLocator for FixedGridLocator {
    fn locate(&self, frame: &Frame) -> Option<LocatedGrid> {
        let BoardBounds { x, y, size } = self.bounds;
        if size <= 0.0 || frame.scale <= 0.0 {
            return None;
        }
        let screen = GridGeometry::from_origin(x, y, size / 8.0);
        let (ox, oy) = frame.origin;
        let scaled = screen.translated(-ox, -oy).scaled(1.0 / frame.scale);
        Some(LocatedGrid { scaled, screen })
    }
}

/// Screen bounds of a located grid.
pub fn bounds_of(grid: &LocatedGrid) -> BoardBounds {
    let cols = grid.screen.cols();
    BoardBounds { x: cols[0], y: grid.screen.rows()[0], size: cols[8] - cols[0] }
}

/// Captures one frame, locates the board and saves its bounds into the config
/// at `path`.
pub fn run_calibration(
    source: &dyn FrameSource,
    locator: &dyn GridLocator,
    config: &mut Config,
    path: &Path,
) -> Result<BoardBounds> {
    let frame = source.capture().context("Failed to capture screen for calibration")?;
    let grid = locator
        .locate(&frame)
        .context("No chessboard found on screen. Make sure the whole board is visible")?;

    let bounds = bounds_of(&grid);
    config.fixed_board = Some(bounds);
    config.save(path)?;
    info!(x = bounds.x, y = bounds.y, size = bounds.size, "saved board calibration");
    Ok(bounds)
}
