//! Move legality and source-square disambiguation.
//!
//! The board is read exactly as recognized on screen, so the user's own pieces
//! always sit at the bottom: "forward" is decreasing row for the mover, the
//! back rank is row 7, and the pawn start rank is row 6. Spoken file/rank
//! coordinates are mirrored accordingly when the user plays black.
//!
//! Only movement geometry is checked. Check, pins and castling rights are
//! outside what a single screenshot can tell us.

use crate::board::{BoardState, Color, Origin, PieceKind, Square};
use crate::command::{FileRank, MoveCommand};
use tracing::{debug, info, warn};

const BACK_ROW: i8 = 7;
const PAWN_START_ROW: i8 = 6;
/// The row a pawn stands on when it may capture en passant (its fifth rank).
const EN_PASSANT_ROW: i8 = 3;

#[derive(Clone, Copy, Debug)]
pub struct RuleEngine {
    user_color: Color,
}

impl RuleEngine {
    pub fn new(user_color: Color) -> Self {
        Self { user_color }
    }

    pub fn user_color(&self) -> Color {
        self.user_color
    }

    /// Spoken coordinate to board square, from the user's side of the board.
    pub fn to_square(&self, coord: FileRank) -> Square {
        let file = coord.file_index();
        let rank = coord.rank as i8;
        let square = if self.user_color == Color::Black {
            Square::new(7 - file, rank - 1)
        } else {
            Square::new(file, 8 - rank)
        };
        debug!(%coord, %square, "coordinate conversion");
        square
    }

    pub fn final_coordinates(&self, command: &MoveCommand) -> Square {
        self.to_square(command.destination)
    }

    pub fn initial_coordinates(&self, command: &MoveCommand, board: &BoardState) -> Origin {
        if let Some(source) = command.source {
            return Origin::Found(self.to_square(source));
        }

        let destination = self.final_coordinates(command);
        let mut candidates = BoardState::squares().filter(|&square| {
            board.get(square).is(command.piece, self.user_color) && can_move(board, square, destination)
        });

        match (candidates.next(), candidates.next()) {
            (None, _) => Origin::Undetermined,
            (Some(square), None) => Origin::Found(square),
            (Some(_), Some(_)) => {
                warn!(piece = %command.piece, %destination, "several pieces can make this move");
                Origin::Ambiguous
            }
        }
    }

    pub fn is_ambiguous_move(&self, command: &MoveCommand, board: &BoardState) -> bool {
        self.initial_coordinates(command, board) == Origin::Ambiguous
    }

    pub fn is_legal_move(&self, command: &MoveCommand, board: &BoardState) -> bool {
        let from = match self.initial_coordinates(command, board) {
            Origin::Found(square) => square,
            origin => {
                warn!(?origin, command = %command.text(), "could not establish starting square");
                return false;
            }
        };
        let to = self.final_coordinates(command);
        let legal = board.get(from).is(command.piece, self.user_color) && can_move(board, from, to);
        info!(command = %command.text(), %from, %to, legal, "legality checked");
        legal
    }
}

/// Whether the piece standing on `from` may move to `to` on `board`.
pub fn can_move(board: &BoardState, from: Square, to: Square) -> bool {
    if !from.on_board() || !to.on_board() || from == to {
        return false;
    }
    let piece = board.get(from);
    if board.get(to).color() == piece.color() {
        return false;
    }

    let d_col = to.col - from.col;
    let d_row = to.row - from.row;

    match piece.kind() {
        PieceKind::King => (d_col.abs() <= 1 && d_row.abs() <= 1) || can_castle(board, from, to),
        PieceKind::Queen => {
            (d_col == 0 || d_row == 0 || d_col.abs() == d_row.abs()) && path_is_clear(board, from, to)
        }
        PieceKind::Rook => (d_col == 0 || d_row == 0) && path_is_clear(board, from, to),
        PieceKind::Bishop => d_col.abs() == d_row.abs() && path_is_clear(board, from, to),
        PieceKind::Knight => matches!((d_col.abs(), d_row.abs()), (1, 2) | (2, 1)),
        PieceKind::Pawn => pawn_can_move(board, from, to),
        PieceKind::Empty | PieceKind::Unknown => false,
    }
}

/// Castling is recognized from geometry alone: the king on its original square
/// shifting two columns toward a same-colored rook in that corner.
fn can_castle(board: &BoardState, from: Square, to: Square) -> bool {
    let king = board.get(from);
    let home_col = match king.color() {
        Color::White => 4,
        Color::Black => 3,
        _ => return false,
    };
    if from != Square::new(home_col, BACK_ROW) || to.row != BACK_ROW || (to.col - from.col).abs() != 2 {
        return false;
    }
    let corner = Square::new(if to.col < from.col { 0 } else { 7 }, BACK_ROW);
    board.get(corner).is(PieceKind::Rook, king.color()) && path_is_clear(board, from, corner)
}

fn pawn_can_move(board: &BoardState, from: Square, to: Square) -> bool {
    let pawn = board.get(from);
    let target = board.get(to);
    let d_col = to.col - from.col;
    let d_row = to.row - from.row;

    match (d_col.abs(), d_row) {
        (0, -1) => target.is_empty(),
        (0, -2) => from.row == PAWN_START_ROW && target.is_empty() && path_is_clear(board, from, to),
        (1, -1) => {
            let opponent = pawn.color().opponent();
            if target.color() == opponent {
                return true;
            }
            let passed = board.get(Square::new(to.col, from.row));
            from.row == EN_PASSANT_ROW && target.is_empty() && passed.is(PieceKind::Pawn, opponent)
        }
        _ => false,
    }
}

/// True when every square strictly between `from` and `to` is empty.
/// The two squares must share a row, column or diagonal.
fn path_is_clear(board: &BoardState, from: Square, to: Square) -> bool {
    let step_col = (to.col - from.col).signum();
    let step_row = (to.row - from.row).signum();
    let mut square = Square::new(from.col + step_col, from.row + step_row);
    while square != to {
        if !board.get(square).is_empty() {
            return false;
        }
        square = Square::new(square.col + step_col, square.row + step_row);
    }
    true
}
