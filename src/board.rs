//! Board model shared by recognition and the rule engine.
//! A `BoardState` is exactly what the classifier saw on screen: row 0 is the top
//! of the board image, column 0 its left edge. Which side sits at the bottom
//! depends on the user's color (see `rules`).

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Pawn,
    Rook,
    Knight,
    Bishop,
    Queen,
    King,
    Empty,
    Unknown,
}

impl PieceKind {
    /// The six real chess pieces, in catalog order.
    pub const PIECES: [PieceKind; 6] = [
        PieceKind::Pawn,
        PieceKind::Rook,
        PieceKind::Knight,
        PieceKind::Bishop,
        PieceKind::Queen,
        PieceKind::King,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PieceKind::Pawn => "pawn",
            PieceKind::Rook => "rook",
            PieceKind::Knight => "knight",
            PieceKind::Bishop => "bishop",
            PieceKind::Queen => "queen",
            PieceKind::King => "king",
            PieceKind::Empty => "empty",
            PieceKind::Unknown => "unknown",
        }
    }

    /// Parses a spoken piece word. Only real pieces are accepted.
    pub fn from_word(word: &str) -> Option<PieceKind> {
        PieceKind::PIECES.into_iter().find(|kind| kind.name() == word)
    }

    fn symbol(self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Rook => 'r',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
            PieceKind::Empty => '.',
            PieceKind::Unknown => '?',
        }
    }
}

impl fmt::Display for PieceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
    Empty,
    Unknown,
}

impl Color {
    pub fn name(self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::White => "white",
            Color::Empty => "empty",
            Color::Unknown => "unknown",
        }
    }

    /// The other player's color. Non-player colors map to themselves.
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
            other => other,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contents of one square. Fields are private so that `Empty` kind and
/// `Empty` color can only ever appear together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    kind: PieceKind,
    color: Color,
}

impl Cell {
    pub const EMPTY: Cell = Cell { kind: PieceKind::Empty, color: Color::Empty };
    pub const UNKNOWN: Cell = Cell { kind: PieceKind::Unknown, color: Color::Unknown };

    /// A piece of the given kind and color. Mismatched empty halves collapse to
    /// `Cell::EMPTY`.
    pub fn new(kind: PieceKind, color: Color) -> Cell {
        if kind == PieceKind::Empty || color == Color::Empty {
            Cell::EMPTY
        } else {
            Cell { kind, color }
        }
    }

    pub fn kind(self) -> PieceKind {
        self.kind
    }

    pub fn color(self) -> Color {
        self.color
    }

    pub fn is_empty(self) -> bool {
        self.kind == PieceKind::Empty
    }

    pub fn is(self, kind: PieceKind, color: Color) -> bool {
        self.kind == kind && self.color == color
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::UNKNOWN
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PieceKind::Empty | PieceKind::Unknown => write!(f, "{}", self.kind),
            _ => write!(f, "{} {}", self.color, self.kind),
        }
    }
}

/// A square index on the recognized board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Square {
    pub col: i8,
    pub row: i8,
}

impl Square {
    pub const fn new(col: i8, row: i8) -> Self {
        Self { col, row }
    }

    pub fn on_board(self) -> bool {
        (0..8).contains(&self.col) && (0..8).contains(&self.row)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

/// Where the piece named by a move command starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Found(Square),
    /// No piece of the requested kind can reach the destination.
    Undetermined,
    /// More than one piece of the requested kind can reach the destination.
    Ambiguous,
}

/// One recognition pass: always 8x8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardState {
    cells: [[Cell; 8]; 8],
}

impl BoardState {
    pub fn unknown() -> Self {
        Self { cells: [[Cell::UNKNOWN; 8]; 8] }
    }

    pub fn empty() -> Self {
        Self { cells: [[Cell::EMPTY; 8]; 8] }
    }

    /// Cell at `square`; off-board squares read as `Unknown`.
    pub fn get(&self, square: Square) -> Cell {
        if square.on_board() {
            self.cells[square.row as usize][square.col as usize]
        } else {
            Cell::UNKNOWN
        }
    }

    pub fn set(&mut self, square: Square, cell: Cell) {
        if square.on_board() {
            self.cells[square.row as usize][square.col as usize] = cell;
        }
    }

    pub fn squares() -> impl Iterator<Item = Square> {
        (0..8).flat_map(|row| (0..8).map(move |col| Square::new(col, row)))
    }
}

impl fmt::Display for BoardState {
    /// Uppercase for white, lowercase for black.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.cells.iter().enumerate() {
            for cell in row {
                let symbol = cell.kind().symbol();
                let symbol = if cell.color() == Color::White { symbol.to_ascii_uppercase() } else { symbol };
                write!(f, "{symbol}")?;
            }
            if i < 7 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
