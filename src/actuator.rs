//! Mouse actuation module.
//! Uses `rdev` to synthesize global mouse events (cross-platform).
//! A move is a press on the source square's center, a drag to the destination
//! center and a release; short pauses let the OS deliver each event in order.
//! Permissions note: On macOS, grant Accessibility permission to the terminal.

use crate::board::Square;
use crate::error::HandsFreeError;
use crate::grid::GridGeometry;
use anyhow::Result;
use rdev::{Button, EventType, simulate};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Something that can move a piece on screen.
pub trait Actuator: Send {
    /// Drags from `from` to `to`, both in board coordinates of `grid` (screen pixels).
    fn move_piece(&mut self, from: Square, to: Square, grid: &GridGeometry) -> Result<()>;
}

/// The drag as a sequence of mouse events.
pub fn drag_events(from: Square, to: Square, grid: &GridGeometry) -> [EventType; 4] {
    let (x1, y1) = grid.cell_center(from);
    let (x2, y2) = grid.cell_center(to);
    [
        EventType::MouseMove { x: x1, y: y1 },
        EventType::ButtonPress(Button::Left),
        EventType::MouseMove { x: x2, y: y2 },
        EventType::ButtonRelease(Button::Left),
    ]
}

/// Drives the real mouse.
pub struct RdevMouse {
    pause: Duration,
}

impl RdevMouse {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }
}

impl Actuator for RdevMouse {
    fn move_piece(&mut self, from: Square, to: Square, grid: &GridGeometry) -> Result<()> {
        for event in drag_events(from, to, grid) {
            simulate(&event).map_err(|e| HandsFreeError::Actuation {
                message: format!("could not send {event:?}: {e:?}"),
            })?;
            thread::sleep(self.pause);
        }
        debug!(%from, %to, "dragged piece");
        Ok(())
    }
}
