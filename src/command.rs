//! Commands extracted from the spoken word stream.
//! Every command keeps the tokens it was built from; `text()` is for display only.

use crate::board::PieceKind;
use std::fmt;

/// Single-word commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlainCommand {
    Exit,
    Pause,
    Help,
    Cancel,
    White,
    Black,
}

impl PlainCommand {
    pub const ALL: [PlainCommand; 6] = [
        PlainCommand::Exit,
        PlainCommand::Pause,
        PlainCommand::Help,
        PlainCommand::Cancel,
        PlainCommand::White,
        PlainCommand::Black,
    ];

    pub fn word(self) -> &'static str {
        match self {
            PlainCommand::Exit => "exit",
            PlainCommand::Pause => "pause",
            PlainCommand::Help => "help",
            PlainCommand::Cancel => "cancel",
            PlainCommand::White => "white",
            PlainCommand::Black => "black",
        }
    }

    pub fn from_word(word: &str) -> Option<PlainCommand> {
        PlainCommand::ALL.into_iter().find(|cmd| cmd.word() == word)
    }
}

/// A spoken board coordinate such as `e4`, before perspective is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileRank {
    pub file: char,
    pub rank: u8,
}

impl FileRank {
    /// Parses a file token (`a`..`h`) and a rank token (`1`..`8`).
    pub fn parse(file: &str, rank: &str) -> Option<FileRank> {
        let mut chars = file.chars();
        let file = chars.next().filter(|c| ('a'..='h').contains(c))?;
        if chars.next().is_some() {
            return None;
        }
        let rank = rank.parse::<u8>().ok().filter(|r| (1..=8).contains(r))?;
        Some(FileRank { file, rank })
    }

    /// Zero-based file index, `a` = 0.
    pub fn file_index(self) -> i8 {
        (self.file as u8 - b'a') as i8
    }
}

impl fmt::Display for FileRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.file.to_ascii_uppercase(), self.rank)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveCommand {
    pub piece: PieceKind,
    pub source: Option<FileRank>,
    pub destination: FileRank,
    tokens: Vec<String>,
}

impl MoveCommand {
    /// Builds a move from `[piece, (to,) file, rank]` or
    /// `[piece, file, rank, (to,) file, rank]`.
    pub fn from_tokens(tokens: &[String]) -> Option<MoveCommand> {
        let words: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|word| *word != "to")
            .collect();
        let piece = PieceKind::from_word(words.first()?)?;
        let (source, destination) = match words.as_slice() {
            [_, file, rank] => (None, FileRank::parse(file, rank)?),
            [_, src_file, src_rank, file, rank] => (
                Some(FileRank::parse(src_file, src_rank)?),
                FileRank::parse(file, rank)?,
            ),
            _ => return None,
        };
        Some(MoveCommand { piece, source, destination, tokens: tokens.to_vec() })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// e.g. `Knight to E4`, or `Pawn E2 to E4` when the source was spoken.
    pub fn text(&self) -> String {
        let mut name = self.piece.name().to_string();
        if let Some(first) = name.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        match self.source {
            Some(source) => format!("{name} {source} to {}", self.destination),
            None => format!("{name} to {}", self.destination),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Plain { command: PlainCommand, tokens: Vec<String> },
    Move(MoveCommand),
}

impl Command {
    pub fn tokens(&self) -> &[String] {
        match self {
            Command::Plain { tokens, .. } => tokens,
            Command::Move(mv) => mv.tokens(),
        }
    }

    pub fn text(&self) -> String {
        match self {
            Command::Plain { tokens, .. } => tokens.join(" "),
            Command::Move(mv) => mv.text(),
        }
    }
}
