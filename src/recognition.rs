//! Background board recognition.
//! Capture, locate and classify in a loop, publishing the newest snapshot.

use crate::board::BoardState;
use crate::capture::FrameSource;
use crate::classifier::PieceClassifier;
use crate::grid::{GridGeometry, GridLocator};
use crate::queue::{LatestQueue, StopSignal};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One recognition pass: the board and where it is on screen.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub grid: GridGeometry,
    pub board: BoardState,
}

#[derive(Clone)]
pub struct Recognizer {
    source: Arc<dyn FrameSource>,
    locator: Arc<dyn GridLocator>,
    classifier: Arc<PieceClassifier>,
    interval: Duration,
    retry_delay: Duration,
}

impl Recognizer {
    pub fn new(
        source: Arc<dyn FrameSource>,
        locator: Arc<dyn GridLocator>,
        classifier: Arc<PieceClassifier>,
        interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self { source, locator, classifier, interval, retry_delay }
    }

    /// A single pass. `None` when the screen can't be captured or has no board.
    pub fn recognize(&self) -> Option<Snapshot> {
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Screen capture failed: {e:#}");
                return None;
            }
        };
        let grid = self.locator.locate(&frame)?;
        let board = self.classifier.classify_board(&frame, &grid.scaled);
        Some(Snapshot { grid: grid.screen, board })
    }

    /// Runs passes until `stop`, pushing each snapshot into `queue`.
    pub fn spawn(&self, queue: LatestQueue<Snapshot>, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        let recognizer = self.clone();
        thread::Builder::new()
            .name("recognition".into())
            .spawn(move || recognizer.run(&queue, &stop))
    }

    fn run(&self, queue: &LatestQueue<Snapshot>, stop: &StopSignal) {
        debug!("recognition worker started");
        while !stop.is_stopped() {
            let start = Instant::now();
            let delay = match self.recognize() {
                Some(snapshot) => {
                    debug!(latency = ?start.elapsed(), "board recognized\n{}", snapshot.board);
                    queue.push(snapshot);
                    self.interval
                }
                None => {
                    warn!("Board not detected. Searching again.");
                    self.retry_delay
                }
            };
            if !stop.sleep(delay) {
                break;
            }
        }
        debug!("recognition worker stopped");
    }
}
