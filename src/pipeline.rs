//! Pipeline orchestrator.
//! Owns the recognition and listener threads and runs the command loop on the
//! caller's thread: transcripts become commands, move commands are checked
//! against the freshest board and carried out with the mouse.
//! Uses `crossbeam-channel` for the text and control queues.

use crate::actuator::Actuator;
use crate::board::{Color, Origin};
use crate::command::{Command, MoveCommand, PlainCommand};
use crate::config::Config;
use crate::error::HandsFreeError;
use crate::lifecycle::{Lifecycle, LifecycleEvent, PipelineState};
use crate::listener::{ListenerFactory, Transcript};
use crate::queue::{LatestQueue, StopSignal, bounded_queue};
use crate::recognition::{Recognizer, Snapshot};
use crate::rules::RuleEngine;
use crate::text_buffer::CommandTextBuffer;
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const HELP: &str = "Say a move like \"knight to e4\" or \"pawn e2 to e4\". \
Other commands: white, black, cancel, pause, help, exit.";

/// Where user-facing status lines go.
pub trait StatusSink {
    fn notify(&mut self, message: &str);
}

/// Requests a UI can send into a running pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
    Stop,
}

#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: Sender<Control>,
}

impl ControlHandle {
    pub fn pause(&self) {
        self.send(Control::Pause);
    }

    pub fn resume(&self) {
        self.send(Control::Resume);
    }

    pub fn stop(&self) {
        self.send(Control::Stop);
    }

    pub fn send(&self, control: Control) {
        // the pipeline keeps a sender alive, so this only fails once it's dropped
        let _ = self.tx.send(control);
    }
}

/// What handling one command amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Moved,
    Ambiguous,
    Illegal,
    NoOp,
}

enum Event {
    Control(Control),
    Transcript(Transcript),
}

pub struct Pipeline {
    lifecycle: Lifecycle,
    buffer: CommandTextBuffer,
    rules: Option<RuleEngine>,
    boards: LatestQueue<Snapshot>,
    last_snapshot: Option<Snapshot>,
    board_wait: Duration,
    text_tx: Sender<Transcript>,
    text_rx: Receiver<Transcript>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    recognizer: Recognizer,
    listener_factory: ListenerFactory,
    actuator: Box<dyn Actuator>,
    sink: Box<dyn StatusSink>,
    stop_signal: StopSignal,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// `color` may be `None`, in which case the user is asked to say it.
    pub fn new(
        config: &Config,
        color: Option<Color>,
        recognizer: Recognizer,
        listener_factory: ListenerFactory,
        actuator: Box<dyn Actuator>,
        sink: Box<dyn StatusSink>,
    ) -> Self {
        let (text_tx, text_rx) = bounded_queue(config.text_queue_capacity);
        let (control_tx, control_rx) = unbounded();
        Self {
            lifecycle: Lifecycle::default(),
            buffer: CommandTextBuffer::new(&config.substitutions),
            rules: color.map(RuleEngine::new),
            boards: LatestQueue::new(),
            last_snapshot: None,
            board_wait: config.board_retry_delay(),
            text_tx,
            text_rx,
            control_tx,
            control_rx,
            recognizer,
            listener_factory,
            actuator,
            sink,
            stop_signal: StopSignal::new(),
            workers: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle { tx: self.control_tx.clone() }
    }

    /// The queue recognition snapshots arrive on.
    #[cfg(test)]
    pub fn board_queue(&self) -> LatestQueue<Snapshot> {
        self.boards.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        self.lifecycle.apply(LifecycleEvent::Start)?;
        self.spawn_workers()?;
        match self.rules {
            Some(rules) => self.sink.notify(&format!("Your color: {}", rules.user_color())),
            None => self.sink.notify("Listening. What's your piece color?"),
        }
        Ok(())
    }

    /// Stops both background threads and drops everything queued or buffered.
    pub fn pause(&mut self) -> Result<()> {
        self.lifecycle.apply(LifecycleEvent::Pause)?;
        self.join_workers();
        self.boards.clear();
        self.last_snapshot = None;
        self.buffer.clear();
        while self.text_rx.try_recv().is_ok() {}
        self.lifecycle.apply(LifecycleEvent::Settle)?;
        self.sink.notify("Paused.");
        Ok(())
    }

    /// Starts fresh background threads after a pause.
    pub fn resume(&mut self) -> Result<()> {
        self.lifecycle.apply(LifecycleEvent::Resume)?;
        self.spawn_workers()?;
        self.lifecycle.apply(LifecycleEvent::Settle)?;
        self.sink.notify("Resumed. Listening.");
        Ok(())
    }

    /// Stops for good. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.lifecycle.is_stopped() {
            return;
        }
        // only fails when already stopped
        let _ = self.lifecycle.apply(LifecycleEvent::Stop);
        self.join_workers();
    }

    /// Starts the pipeline if needed and handles transcripts and control
    /// requests until stopped. A failing step stops the pipeline and its error
    /// is returned.
    pub fn run(&mut self) -> Result<()> {
        if self.state() == PipelineState::Idle {
            self.guarded(|pipeline| pipeline.start())?;
        }

        let control_rx = self.control_rx.clone();
        let text_rx = self.text_rx.clone();
        while !self.lifecycle.is_stopped() {
            let event = select! {
                recv(control_rx) -> msg => msg.ok().map(Event::Control),
                recv(text_rx) -> msg => msg.ok().map(Event::Transcript),
            };
            match event {
                Some(Event::Control(control)) => self.guarded(|pipeline| pipeline.handle_control(control))?,
                Some(Event::Transcript(transcript)) => {
                    self.guarded(|pipeline| pipeline.handle_transcript(transcript))?;
                }
                None => break,
            }
        }
        self.stop();
        info!("pipeline finished");
        Ok(())
    }

    /// Handles one transcript, returning an outcome per command it completed.
    pub fn handle_transcript(&mut self, transcript: Transcript) -> Result<Vec<CycleOutcome>> {
        let text = match transcript {
            Transcript::Heard(text) => text,
            Transcript::Unrecognized => {
                self.sink.notify("Speech not understood");
                return Ok(Vec::new());
            }
        };

        let echo = self.buffer.add_text(&text).join(" ");
        if !echo.is_empty() {
            self.sink.notify(&format!("Heard: {echo}"));
        }

        let mut outcomes = Vec::new();
        while self.state() == PipelineState::Running {
            let Some(command) = self.buffer.get_command() else {
                break;
            };
            info!(command = %command.text(), "command");
            outcomes.push(self.handle_command(command)?);
        }
        Ok(outcomes)
    }

    fn handle_command(&mut self, command: Command) -> Result<CycleOutcome> {
        debug!(tokens = ?command.tokens(), "command recognized");
        let plain = match command {
            Command::Move(mv) => return self.handle_move(&mv),
            Command::Plain { command, .. } => command,
        };
        match plain {
            PlainCommand::Exit => {
                self.sink.notify("Stopping Hands-Free Chess as requested by the user.");
                self.stop();
            }
            PlainCommand::Pause => self.pause()?,
            PlainCommand::Help => self.sink.notify(HELP),
            PlainCommand::Cancel => self.sink.notify("Command cancelled."),
            PlainCommand::White | PlainCommand::Black => {
                let color = if plain == PlainCommand::White { Color::White } else { Color::Black };
                self.rules = Some(RuleEngine::new(color));
                info!(%color, "piece color set");
                self.sink.notify(&format!("Your color: {color}"));
            }
        }
        Ok(CycleOutcome::NoOp)
    }

    fn handle_move(&mut self, command: &MoveCommand) -> Result<CycleOutcome> {
        let Some(rules) = self.rules else {
            self.sink.notify("What's your piece color? Say \"white\" or \"black\".");
            return Ok(CycleOutcome::NoOp);
        };
        self.sink.notify(&format!("Your move: {}", command.text()));

        let Some(snapshot) = self.current_snapshot() else {
            warn!("no board available for move");
            self.sink.notify("Board not detected. Searching again.");
            return Ok(CycleOutcome::NoOp);
        };
        debug!("deciding on board\n{}", snapshot.board);

        if rules.is_ambiguous_move(command, &snapshot.board) {
            self.sink.notify(&format!(
                "Ambiguous move. Please repeat and specify which {} you want to move.",
                command.piece
            ));
            return Ok(CycleOutcome::Ambiguous);
        }
        let from = match rules.initial_coordinates(command, &snapshot.board) {
            Origin::Found(from) if rules.is_legal_move(command, &snapshot.board) => from,
            _ => {
                warn!(command = %command.text(), "illegal move");
                self.sink.notify("Illegal move! Try again.");
                return Ok(CycleOutcome::Illegal);
            }
        };
        let to = rules.final_coordinates(command);

        info!(piece = %command.piece, %from, %to, "OK! Moving");
        self.actuator
            .move_piece(from, to, &snapshot.grid)
            .with_context(|| format!("Failed to play {}", command.text()))?;

        // the board on screen has changed
        self.boards.clear();
        self.last_snapshot = None;
        Ok(CycleOutcome::Moved)
    }

    /// Freshest snapshot, else the last one used, else whatever arrives
    /// within the retry delay.
    fn current_snapshot(&mut self) -> Option<Snapshot> {
        if let Some(fresh) = self.boards.take() {
            self.last_snapshot = Some(fresh);
        } else if self.last_snapshot.is_none() {
            self.last_snapshot = self.boards.wait(self.board_wait);
        }
        self.last_snapshot.clone()
    }

    fn handle_control(&mut self, control: Control) -> Result<()> {
        let result = match control {
            Control::Pause => self.pause(),
            Control::Resume => self.resume(),
            Control::Stop => {
                self.sink.notify("Stopping.");
                self.stop();
                Ok(())
            }
        };
        match result {
            Err(e) if matches!(e.downcast_ref::<HandsFreeError>(), Some(HandsFreeError::InvalidTransition { .. })) => {
                warn!("Ignoring request: {e}");
                self.sink.notify(&e.to_string());
                Ok(())
            }
            other => other,
        }
    }

    fn spawn_workers(&mut self) -> Result<()> {
        self.stop_signal = StopSignal::new();

        let recognition = self
            .recognizer
            .spawn(self.boards.clone(), self.stop_signal.clone())
            .context("Failed to spawn recognition thread")?;
        self.workers.push(recognition);

        let mut listener = (self.listener_factory)().context("Failed to create listener")?;
        let tx = self.text_tx.clone();
        let stop = self.stop_signal.clone();
        let listening = thread::Builder::new()
            .name("listener".into())
            .spawn(move || {
                if let Err(e) = listener.listen(&tx, &stop) {
                    error!("Listener failed: {e:#}");
                }
            })
            .context("Failed to spawn listener thread")?;
        self.workers.push(listening);
        debug!("workers started");
        Ok(())
    }

    fn join_workers(&mut self) {
        self.stop_signal.stop();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("workers joined");
    }

    /// Runs one step; on error or panic the pipeline is stopped and the user told.
    fn guarded<T>(&mut self, step: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| step(self)))
            .unwrap_or_else(|payload| Err(anyhow!("pipeline step panicked: {}", panic_message(&*payload))));
        if let Err(e) = &result {
            error!("Error in pipeline: {e:#}");
            self.sink.notify(&format!("Error: {e:#}"));
            self.stop();
        }
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardState, Cell, PieceKind, Square};
    use crate::capture::{Frame, FrameSource};
    use crate::classifier::{PieceClassifier, ReferenceCatalog};
    use crate::config::ClassifierThresholds;
    use crate::grid::{CheckerPatternLocator, GridGeometry};
    use crate::listener::{ConsoleListener, Listener};
    use anyhow::bail;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    type Moves = Arc<Mutex<Vec<(Square, Square)>>>;
    type Messages = Arc<Mutex<Vec<String>>>;

    struct NoScreen;

    impl FrameSource for NoScreen {
        fn capture(&self) -> Result<Frame> {
            bail!("no display")
        }
    }

    #[derive(Default)]
    struct FakeMouse {
        moves: Moves,
        fail: bool,
        panic: bool,
    }

    impl Actuator for FakeMouse {
        fn move_piece(&mut self, from: Square, to: Square, _grid: &GridGeometry) -> Result<()> {
            if self.panic {
                panic!("mouse exploded");
            }
            if self.fail {
                bail!("mouse unplugged");
            }
            self.moves.lock().unwrap().push((from, to));
            Ok(())
        }
    }

    struct Recorder(Messages);

    impl StatusSink for Recorder {
        fn notify(&mut self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    struct Harness {
        pipeline: Pipeline,
        moves: Moves,
        messages: Messages,
        lines: Sender<String>,
    }

    impl Harness {
        fn said(&self, text: &str) -> bool {
            self.messages.lock().unwrap().iter().any(|m| m == text)
        }

        /// Types `lines` once the pipeline has started listening.
        fn say_when_listening(&self, lines: &[&str]) -> thread::JoinHandle<()> {
            let messages = self.messages.clone();
            let tx = self.lines.clone();
            let lines: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !messages.lock().unwrap().iter().any(|m| m.starts_with("Your color")) {
                    assert!(Instant::now() < deadline, "pipeline never started listening");
                    thread::sleep(Duration::from_millis(5));
                }
                for line in lines {
                    tx.send(line).unwrap();
                }
            })
        }
    }

    fn harness(color: Option<Color>, mouse: FakeMouse) -> Harness {
        let config = Config { board_retry_delay_ms: 50, recognition_interval_ms: 20, ..Config::default() };
        let catalog = ReferenceCatalog::from_images(8, Vec::new());
        let recognizer = Recognizer::new(
            Arc::new(NoScreen),
            Arc::new(CheckerPatternLocator::default()),
            Arc::new(PieceClassifier::new(Arc::new(catalog), ClassifierThresholds::default())),
            config.recognition_interval(),
            config.board_retry_delay(),
        );

        let (lines, line_rx) = unbounded::<String>();
        let factory: ListenerFactory =
            Box::new(move || Ok(Box::new(ConsoleListener::new(line_rx.clone())) as Box<dyn Listener>));

        let moves = mouse.moves.clone();
        let messages = Messages::default();
        let pipeline = Pipeline::new(&config, color, recognizer, factory, Box::new(mouse), Box::new(Recorder(messages.clone())));
        Harness { pipeline, moves, messages, lines }
    }

    fn white(kind: PieceKind) -> Cell {
        Cell::new(kind, Color::White)
    }

    fn snapshot(pieces: &[(Square, Cell)]) -> Snapshot {
        let mut board = BoardState::empty();
        for &(square, cell) in pieces {
            board.set(square, cell);
        }
        Snapshot { grid: GridGeometry::from_origin(0.0, 0.0, 100.0), board }
    }

    fn heard(text: &str) -> Transcript {
        Transcript::Heard(text.to_string())
    }

    #[test]
    fn test_legal_move_drags_piece() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        h.pipeline.board_queue().push(snapshot(&[(Square::new(4, 6), white(PieceKind::Pawn))]));

        let outcomes = h.pipeline.handle_transcript(heard("pawn e4")).unwrap();
        assert_eq!(outcomes, vec![CycleOutcome::Moved]);
        assert_eq!(*h.moves.lock().unwrap(), vec![(Square::new(4, 6), Square::new(4, 4))]);
        assert!(h.said("Your move: Pawn to E4"));
        h.pipeline.stop();
    }

    #[test]
    fn test_ambiguous_move_asks_again() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        let knight = white(PieceKind::Knight);
        h.pipeline.board_queue().push(snapshot(&[(Square::new(1, 7), knight), (Square::new(5, 5), knight)]));

        let outcomes = h.pipeline.handle_transcript(heard("knight to d2")).unwrap();
        assert_eq!(outcomes, vec![CycleOutcome::Ambiguous]);
        assert!(h.said("Ambiguous move. Please repeat and specify which knight you want to move."));
        assert!(h.moves.lock().unwrap().is_empty());

        // naming the source resolves it, against the last board seen
        let outcomes = h.pipeline.handle_transcript(heard("knight b1 to d2")).unwrap();
        assert_eq!(outcomes, vec![CycleOutcome::Moved]);
        assert_eq!(*h.moves.lock().unwrap(), vec![(Square::new(1, 7), Square::new(3, 6))]);
        h.pipeline.stop();
    }

    #[test]
    fn test_blocked_rook_is_illegal() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        h.pipeline.board_queue().push(snapshot(&[
            (Square::new(0, 7), white(PieceKind::Rook)),
            (Square::new(0, 6), white(PieceKind::Pawn)),
        ]));

        let outcomes = h.pipeline.handle_transcript(heard("rook a5")).unwrap();
        assert_eq!(outcomes, vec![CycleOutcome::Illegal]);
        assert!(h.said("Illegal move! Try again."));
        h.pipeline.stop();
    }

    #[test]
    fn test_color_is_asked_for_first() {
        let mut h = harness(None, FakeMouse::default());
        h.pipeline.start().unwrap();
        h.pipeline.board_queue().push(snapshot(&[(Square::new(4, 6), white(PieceKind::Pawn))]));

        assert_eq!(h.pipeline.handle_transcript(heard("pawn e4")).unwrap(), vec![CycleOutcome::NoOp]);
        assert!(h.moves.lock().unwrap().is_empty());

        let outcomes = h.pipeline.handle_transcript(heard("white pawn e4")).unwrap();
        assert_eq!(outcomes, vec![CycleOutcome::NoOp, CycleOutcome::Moved]);
        assert!(h.said("Your color: white"));
        h.pipeline.stop();
    }

    #[test]
    fn test_no_board_is_noop() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        assert_eq!(h.pipeline.handle_transcript(heard("queen d4")).unwrap(), vec![CycleOutcome::NoOp]);
        assert!(h.said("Board not detected. Searching again."));
        h.pipeline.stop();
    }

    #[test]
    fn test_unrecognized_speech_is_reported() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        assert!(h.pipeline.handle_transcript(Transcript::Unrecognized).unwrap().is_empty());
        assert!(h.said("Speech not understood"));
        h.pipeline.stop();
    }

    #[test]
    fn test_pause_and_resume() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        h.pipeline.handle_transcript(heard("knight")).unwrap();
        h.pipeline.board_queue().push(snapshot(&[]));

        h.pipeline.pause().unwrap();
        assert_eq!(h.pipeline.state(), PipelineState::Paused);
        assert!(h.pipeline.board_queue().take().is_none());
        assert!(h.pipeline.pause().is_err());

        h.pipeline.resume().unwrap();
        assert_eq!(h.pipeline.state(), PipelineState::Running);
        // "knight" from before the pause is gone
        assert!(h.pipeline.handle_transcript(heard("e4")).unwrap().is_empty());
        h.pipeline.stop();
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_speech_during_pause_is_discarded() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.start().unwrap();
        h.pipeline.pause().unwrap();

        h.lines.send("knight f3".into()).unwrap();
        h.pipeline.resume().unwrap();
        assert!(h.pipeline.text_rx.recv_timeout(Duration::from_millis(300)).is_err());

        h.lines.send("pawn e4".into()).unwrap();
        let heard_after = h.pipeline.text_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(heard_after, heard("pawn e4"));
        h.pipeline.stop();
    }

    #[test]
    fn test_run_until_exit() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        h.pipeline.board_queue().push(snapshot(&[(Square::new(6, 7), white(PieceKind::Knight))]));
        let typist = h.say_when_listening(&["knight f3", "exit"]);

        h.pipeline.run().unwrap();
        typist.join().unwrap();
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
        assert_eq!(*h.moves.lock().unwrap(), vec![(Square::new(6, 7), Square::new(5, 5))]);
        assert!(h.said("Stopping Hands-Free Chess as requested by the user."));
    }

    #[test]
    fn test_control_stop_ends_run() {
        let mut h = harness(Some(Color::White), FakeMouse::default());
        let control = h.pipeline.control_handle();
        control.resume();
        control.stop();
        h.pipeline.run().unwrap();
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
        assert!(h.said("Cannot Resume while Running"));
    }

    #[test]
    fn test_actuator_error_stops_pipeline() {
        let mut h = harness(Some(Color::White), FakeMouse { fail: true, ..FakeMouse::default() });
        h.pipeline.board_queue().push(snapshot(&[(Square::new(4, 6), white(PieceKind::Pawn))]));
        let typist = h.say_when_listening(&["pawn e4"]);

        assert!(h.pipeline.run().is_err());
        typist.join().unwrap();
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_panicking_step_is_caught() {
        let mut h = harness(Some(Color::White), FakeMouse { panic: true, ..FakeMouse::default() });
        h.pipeline.board_queue().push(snapshot(&[(Square::new(4, 6), white(PieceKind::Pawn))]));
        let typist = h.say_when_listening(&["pawn e4"]);

        let error = h.pipeline.run().unwrap_err();
        typist.join().unwrap();
        assert!(error.to_string().contains("mouse exploded"));
        assert_eq!(h.pipeline.state(), PipelineState::Stopped);
    }
}
