//! Speech input.
//! A listener turns whatever it hears into `Transcript`s; recognition itself
//! happens outside this crate. The console listener stands in for a speech
//! service by treating each typed line as one utterance.

use crate::queue::{StopSignal, send_until_stopped};
use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::debug;

const POLL: Duration = Duration::from_millis(100);

/// One utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transcript {
    /// Lowercased text.
    Heard(String),
    /// Speech was detected but not understood.
    Unrecognized,
}

pub trait Listener: Send {
    /// Delivers transcripts into `tx` until `stop` is signalled or the input ends.
    fn listen(&mut self, tx: &Sender<Transcript>, stop: &StopSignal) -> Result<()>;
}

/// Builds a fresh listener each time the pipeline (re)starts.
pub type ListenerFactory = Box<dyn Fn() -> Result<Box<dyn Listener>> + Send>;

/// Typed lines as transcripts. A blank line counts as unrecognized speech.
pub struct ConsoleListener {
    lines: Receiver<String>,
}

impl ConsoleListener {
    /// Lines already waiting in `lines` were typed while nobody was listening
    /// and are discarded.
    pub fn new(lines: Receiver<String>) -> Self {
        let stale = lines.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded lines typed while not listening");
        }
        Self { lines }
    }
}

impl Listener for ConsoleListener {
    fn listen(&mut self, tx: &Sender<Transcript>, stop: &StopSignal) -> Result<()> {
        while !stop.is_stopped() {
            let line = match self.lines.recv_timeout(POLL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let text = line.trim().to_lowercase();
            let transcript = if text.is_empty() { Transcript::Unrecognized } else { Transcript::Heard(text) };
            debug!(?transcript, "heard");
            if !send_until_stopped(tx, transcript, stop) {
                break;
            }
        }
        Ok(())
    }
}
