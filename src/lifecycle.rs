//! Pipeline lifecycle.
//! Pausing tears the background threads down and resuming builds new ones, so
//! the in-between states exist to reject a second request while threads are
//! still being joined or spawned.

use crate::error::HandsFreeError;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Pausing,
    Paused,
    Resuming,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Pause,
    Resume,
    Stop,
    /// Threads finished stopping or starting.
    Settle,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: PipelineState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self { state: PipelineState::Idle }
    }
}

impl Lifecycle {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PipelineState::Stopped
    }

    pub fn apply(&mut self, event: LifecycleEvent) -> Result<PipelineState, HandsFreeError> {
        use LifecycleEvent as E;
        use PipelineState as S;

        let next = match (self.state, event) {
            (S::Idle, E::Start) => S::Running,
            (S::Running, E::Pause) => S::Pausing,
            (S::Pausing, E::Settle) => S::Paused,
            (S::Paused, E::Resume) => S::Resuming,
            (S::Resuming, E::Settle) => S::Running,
            (S::Stopped, E::Stop) => return Err(self.invalid(event)),
            (_, E::Stop) => S::Stopped,
            _ => return Err(self.invalid(event)),
        };
        info!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
        Ok(next)
    }

    fn invalid(&self, event: LifecycleEvent) -> HandsFreeError {
        HandsFreeError::InvalidTransition { state: self.state, event }
    }
}
