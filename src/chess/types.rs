//! Core chess data types: squares, pieces, the board, and moves.
//!
//! Generalizes `checkai`'s `types.rs`: the same flat 8×8 representation, but
//! pieces carry a stable identity and a `has_moved` bit (needed for castling
//! legality per-piece rather than only via the derived `CastlingRights`
//! bits), and `Move` carries the full flag set `spec.md` §3 names.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Row index (0-based) where this color's pawns start.
    pub fn pawn_start_row(self) -> u8 {
        match self {
            Color::White => 1,
            Color::Black => 6,
        }
    }

    /// Row index (0-based) where this color's pawns promote.
    pub fn promotion_row(self) -> u8 {
        match self {
            Color::White => 7,
            Color::Black => 0,
        }
    }

    /// +1 for White (moves towards row 7), -1 for Black.
    pub fn pawn_direction(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }

    /// Row index (0-based) of this color's back rank.
    pub fn back_rank(self) -> u8 {
        match self {
            Color::White => 0,
            Color::Black => 7,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

// ---------------------------------------------------------------------------
// PieceKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    King,
    Queen,
    Rook,
    Bishop,
    Knight,
    Pawn,
}

impl PieceKind {
    pub fn to_fen_char(self, color: Color) -> char {
        let c = match self {
            PieceKind::King => 'K',
            PieceKind::Queen => 'Q',
            PieceKind::Rook => 'R',
            PieceKind::Bishop => 'B',
            PieceKind::Knight => 'N',
            PieceKind::Pawn => 'P',
        };
        match color {
            Color::White => c,
            Color::Black => c.to_ascii_lowercase(),
        }
    }

    pub fn from_fen_char(c: char) -> Option<(Self, Color)> {
        let color = if c.is_uppercase() { Color::White } else { Color::Black };
        let kind = match c.to_ascii_uppercase() {
            'K' => PieceKind::King,
            'Q' => PieceKind::Queen,
            'R' => PieceKind::Rook,
            'B' => PieceKind::Bishop,
            'N' => PieceKind::Knight,
            'P' => PieceKind::Pawn,
            _ => return None,
        };
        Some((kind, color))
    }

    /// Promotion-piece letter used on the wire (`e7e8q`) and in FEN.
    pub fn promotion_letter(self) -> Option<char> {
        match self {
            PieceKind::Queen => Some('q'),
            PieceKind::Rook => Some('r'),
            PieceKind::Bishop => Some('b'),
            PieceKind::Knight => Some('n'),
            _ => None,
        }
    }

    pub fn from_promotion_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(PieceKind::Queen),
            'r' => Some(PieceKind::Rook),
            'b' => Some(PieceKind::Bishop),
            'n' => Some(PieceKind::Knight),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A board square. `row` 0 is rank 1 (White's back rank), `col` 0 is file a.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: u8,
    pub col: u8,
}

impl Position {
    pub fn new(col: u8, row: u8) -> Self {
        debug_assert!(col < 8 && row < 8, "position out of bounds");
        Self { row, col }
    }

    pub fn from_algebraic(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let col = bytes[0].wrapping_sub(b'a');
        let row = bytes[1].wrapping_sub(b'1');
        if col < 8 && row < 8 {
            Some(Position { row, col })
        } else {
            None
        }
    }

    pub fn to_algebraic(self) -> String {
        format!("{}{}", (b'a' + self.col) as char, self.row + 1)
    }

    pub fn offset(self, dcol: i8, drow: i8) -> Option<Position> {
        let c = self.col as i8 + dcol;
        let r = self.row as i8 + drow;
        if (0..8).contains(&c) && (0..8).contains(&r) {
            Some(Position::new(c as u8, r as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        (self.row as usize) * 8 + self.col as usize
    }

    pub fn from_index(i: usize) -> Self {
        Position::new((i % 8) as u8, (i / 8) as u8)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Piece
// ---------------------------------------------------------------------------

/// One chessman. `id` survives across ordinary moves but not promotion — a
/// promoted piece is a fresh identity (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub id: u64,
    pub kind: PieceKind,
    pub color: Color,
    pub position: Position,
    pub has_moved: bool,
}

impl Piece {
    pub fn to_fen_char(self) -> char {
        self.kind.to_fen_char(self.color)
    }
}

// ---------------------------------------------------------------------------
// Castling rights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SideCastlingRights {
    pub kingside: bool,
    pub queenside: bool,
}

impl Default for SideCastlingRights {
    fn default() -> Self {
        Self { kingside: true, queenside: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white: SideCastlingRights,
    pub black: SideCastlingRights,
}

impl CastlingRights {
    pub fn for_color(&self, color: Color) -> &SideCastlingRights {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub fn for_color_mut(&mut self, color: Color) -> &mut SideCastlingRights {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn to_fen(&self) -> String {
        let mut s = String::new();
        if self.white.kingside {
            s.push('K');
        }
        if self.white.queenside {
            s.push('Q');
        }
        if self.black.kingside {
            s.push('k');
        }
        if self.black.queenside {
            s.push('q');
        }
        if s.is_empty() { "-".to_string() } else { s }
    }

    pub fn from_fen(s: &str) -> Self {
        let mut rights = CastlingRights {
            white: SideCastlingRights { kingside: false, queenside: false },
            black: SideCastlingRights { kingside: false, queenside: false },
        };
        if s == "-" {
            return rights;
        }
        for c in s.chars() {
            match c {
                'K' => rights.white.kingside = true,
                'Q' => rights.white.queenside = true,
                'k' => rights.black.kingside = true,
                'q' => rights.black.queenside = true,
                _ => {}
            }
        }
        rights
    }
}

// ---------------------------------------------------------------------------
// Move flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveFlag {
    Capture,
    EnPassant,
    CastleKingside,
    CastleQueenside,
    PawnPromotion,
    Check,
    Checkmate,
    DoublePawnPush,
}

/// A single executed or proposed ply, carrying every derived flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from: Position,
    pub to: Position,
    pub piece_type: PieceKind,
    pub player_color: Color,
    pub promotion_type: Option<PieceKind>,
    pub flags: Vec<MoveFlag>,
    pub captured_piece: Option<Piece>,
    /// Client-requested timestamp (ms since epoch), if supplied on the wire.
    pub client_requested_at: Option<i64>,
    /// Server-validated timestamp (ms since epoch).
    pub validated_at: i64,
}

impl Move {
    pub fn has_flag(&self, flag: MoveFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Coordinate notation: `e2e4`, or `e7e8q` for promotion.
    pub fn to_coordinate_notation(&self) -> String {
        let mut s = format!("{}{}", self.from.to_algebraic(), self.to.to_algebraic());
        if let Some(promo) = self.promotion_type.and_then(PieceKind::promotion_letter) {
            s.push(promo);
        }
        s
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_coordinate_notation())
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// The 8×8 occupancy grid plus the position-dependent state FEN needs.
#[derive(Debug, Clone)]
pub struct Board {
    squares: [Option<Piece>; 64],
    next_piece_id: u64,
}

impl Board {
    /// An empty board.
    pub fn empty() -> Self {
        Self { squares: [None; 64], next_piece_id: 0 }
    }

    pub fn get(&self, pos: Position) -> Option<Piece> {
        self.squares[pos.index()]
    }

    /// Places (or clears) the piece at `pos`. Keeps the piece's own
    /// `position` field in sync with the grid index it occupies.
    pub fn set(&mut self, pos: Position, piece: Option<Piece>) {
        self.squares[pos.index()] = piece.map(|mut p| {
            p.position = pos;
            p
        });
    }

    /// Mints a fresh, stable piece identity (used at setup and on promotion).
    pub fn mint_piece_id(&mut self) -> u64 {
        let id = self.next_piece_id;
        self.next_piece_id += 1;
        id
    }

    /// The standard starting position.
    pub fn starting_position() -> Self {
        let mut board = Board::empty();
        let back_rank = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        for (col, kind) in back_rank.iter().enumerate() {
            for color in [Color::White, Color::Black] {
                let row = color.back_rank();
                let id = board.mint_piece_id();
                board.set(
                    Position::new(col as u8, row),
                    Some(Piece { id, kind: *kind, color, position: Position::new(col as u8, row), has_moved: false }),
                );
            }
        }
        for col in 0..8u8 {
            for color in [Color::White, Color::Black] {
                let row = color.pawn_start_row();
                let id = board.mint_piece_id();
                board.set(
                    Position::new(col, row),
                    Some(Piece { id, kind: PieceKind::Pawn, color, position: Position::new(col, row), has_moved: false }),
                );
            }
        }
        board
    }

    /// Derived flat list of pieces on the board. A pure view over the grid —
    /// invariant (b), "occupancy grid and piece list are mutually
    /// consistent", holds by construction rather than by upkeep.
    pub fn pieces(&self) -> Vec<Piece> {
        self.squares.iter().filter_map(|s| *s).collect()
    }

    pub fn find_king(&self, color: Color) -> Option<Position> {
        self.squares
            .iter()
            .enumerate()
            .find_map(|(i, s)| match s {
                Some(p) if p.kind == PieceKind::King && p.color == color => Some(Position::from_index(i)),
                _ => None,
            })
    }

    /// The first four FEN fields (piece placement, side to move, castling,
    /// en passant) — the "position key" used for repetition detection.
    pub fn position_key(&self, turn: Color, castling: &CastlingRights, en_passant: Option<Position>) -> String {
        let mut fen = self.placement_fen();
        fen.push(' ');
        fen.push(match turn {
            Color::White => 'w',
            Color::Black => 'b',
        });
        fen.push(' ');
        fen.push_str(&castling.to_fen());
        fen.push(' ');
        match en_passant {
            Some(sq) => fen.push_str(&sq.to_algebraic()),
            None => fen.push('-'),
        }
        fen
    }

    fn placement_fen(&self) -> String {
        let mut fen = String::new();
        for row in (0..8u8).rev() {
            let mut empty_run = 0;
            for col in 0..8u8 {
                match self.get(Position::new(col, row)) {
                    Some(piece) => {
                        if empty_run > 0 {
                            fen.push_str(&empty_run.to_string());
                            empty_run = 0;
                        }
                        fen.push(piece.to_fen_char());
                    }
                    None => empty_run += 1,
                }
            }
            if empty_run > 0 {
                fen.push_str(&empty_run.to_string());
            }
            if row > 0 {
                fen.push('/');
            }
        }
        fen
    }

    /// Full six-field FEN.
    pub fn to_fen(
        &self,
        turn: Color,
        castling: &CastlingRights,
        en_passant: Option<Position>,
        halfmove_clock: u32,
        fullmove_number: u32,
    ) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.placement_fen(),
            match turn {
                Color::White => 'w',
                Color::Black => 'b',
            },
            castling.to_fen(),
            en_passant.map(|s| s.to_algebraic()).unwrap_or_else(|| "-".to_string()),
            halfmove_clock,
            fullmove_number,
        )
    }

    /// Parses a full six-field FEN string into a board plus the
    /// position-dependent fields that live alongside it.
    pub fn from_fen(fen: &str) -> Result<ParsedFen, String> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(format!("FEN must have 6 fields, got {}", fields.len()));
        }
        let mut board = Board::empty();
        let rows: Vec<&str> = fields[0].split('/').collect();
        if rows.len() != 8 {
            return Err(format!("FEN placement must have 8 ranks, got {}", rows.len()));
        }
        for (rank_from_top, rank_str) in rows.iter().enumerate() {
            let row = 7 - rank_from_top as u8;
            let mut col = 0u8;
            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    col += skip as u8;
                    continue;
                }
                if col >= 8 {
                    return Err("too many squares in a FEN rank".to_string());
                }
                let (kind, color) = PieceKind::from_fen_char(c).ok_or_else(|| format!("invalid FEN piece '{c}'"))?;
                let id = board.mint_piece_id();
                let pos = Position::new(col, row);
                board.set(pos, Some(Piece { id, kind, color, position: pos, has_moved: true }));
                col += 1;
            }
        }

        let turn = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            other => return Err(format!("invalid side to move '{other}'")),
        };
        let castling = CastlingRights::from_fen(fields[2]);
        let en_passant = if fields[3] == "-" {
            None
        } else {
            Some(Position::from_algebraic(fields[3]).ok_or_else(|| format!("invalid en passant square '{}'", fields[3]))?)
        };
        let halfmove_clock: u32 = fields[4].parse().map_err(|_| "invalid halfmove clock".to_string())?;
        let fullmove_number: u32 = fields[5].parse().map_err(|_| "invalid fullmove number".to_string())?;

        // Starting-square pieces that have never been verified to have moved
        // are conservatively marked unmoved so castling legality still checks
        // the grid; everything else loaded from FEN is treated as moved,
        // since FEN cannot distinguish "never moved" from "moved and
        // returned". `castling` (not `has_moved`) is authoritative for
        // castling legality loaded from FEN.
        for color in [Color::White, Color::Black] {
            let row = color.back_rank();
            for col in [0u8, 4, 7] {
                let pos = Position::new(col, row);
                if let Some(mut p) = board.get(pos) {
                    if (p.kind == PieceKind::King && col == 4) || (p.kind == PieceKind::Rook && (col == 0 || col == 7)) {
                        p.has_moved = false;
                        board.set(pos, Some(p));
                    }
                }
            }
        }

        Ok(ParsedFen { board, turn, castling, en_passant, halfmove_clock, fullmove_number })
    }
}

/// The result of parsing a FEN string: the board plus the fields that live
/// alongside it in `GameSession`/`Game`.
pub struct ParsedFen {
    pub board: Board,
    pub turn: Color,
    pub castling: CastlingRights,
    pub en_passant: Option<Position>,
    pub halfmove_clock: u32,
    pub fullmove_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algebraic_round_trip() {
        for col in 0..8u8 {
            for row in 0..8u8 {
                let p = Position::new(col, row);
                assert_eq!(Position::from_algebraic(&p.to_algebraic()), Some(p));
            }
        }
    }

    #[test]
    fn starting_position_fen() {
        let board = Board::starting_position();
        let fen = board.to_fen(Color::White, &CastlingRights::default(), None, 0, 1);
        assert_eq!(fen, "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1");
    }

    #[test]
    fn fen_round_trip_from_starting_position() {
        let board = Board::starting_position();
        let fen = board.to_fen(Color::White, &CastlingRights::default(), None, 0, 1);
        let parsed = Board::from_fen(&fen).unwrap();
        let fen2 = parsed.board.to_fen(parsed.turn, &parsed.castling, parsed.en_passant, parsed.halfmove_clock, parsed.fullmove_number);
        assert_eq!(fen, fen2);
    }

    #[test]
    fn pieces_derived_list_matches_grid_count() {
        let board = Board::starting_position();
        assert_eq!(board.pieces().len(), 32);
    }
}
