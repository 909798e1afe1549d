//! Move legality: pseudo-legal generation, check detection, special-move
//! construction, and terminal detection.
//!
//! Generalizes `checkai`'s `movegen.rs`. The biggest behavioral difference
//! from the teacher is castling legality, which here also consults each
//! piece's own `has_moved` bit (not just the `CastlingRights` bits) per
//! `spec.md` §4.1's explicit contract ("king and the relevant rook are at
//! their origin squares, both have `hasMoved == false`").

use crate::chess::types::{
    Board, CastlingRights, Color, Move, MoveFlag, PieceKind, Position,
};
use crate::error::MoveError;

const ROOK_DIRS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const KNIGHT_OFFSETS: [(i8, i8); 8] = [
    (-2, -1), (-2, 1), (-1, -2), (-1, 2),
    (1, -2), (1, 2), (2, -1), (2, 1),
];

/// A candidate move before check-filtering and flag derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    from: Position,
    to: Position,
    promotion: Option<PieceKind>,
    is_castle_kingside: bool,
    is_castle_queenside: bool,
    is_en_passant: bool,
}

impl Candidate {
    fn simple(from: Position, to: Position) -> Self {
        Self { from, to, promotion: None, is_castle_kingside: false, is_castle_queenside: false, is_en_passant: false }
    }
}

/// Returns `true` if `pos` is attacked by any piece of `attacker_color`.
pub fn is_square_attacked(board: &Board, pos: Position, attacker_color: Color) -> bool {
    for &(dc, dr) in &KNIGHT_OFFSETS {
        if let Some(from) = pos.offset(dc, dr) {
            if let Some(p) = board.get(from) {
                if p.color == attacker_color && p.kind == PieceKind::Knight {
                    return true;
                }
            }
        }
    }

    for dc in -1..=1i8 {
        for dr in -1..=1i8 {
            if dc == 0 && dr == 0 {
                continue;
            }
            if let Some(from) = pos.offset(dc, dr) {
                if let Some(p) = board.get(from) {
                    if p.color == attacker_color && p.kind == PieceKind::King {
                        return true;
                    }
                }
            }
        }
    }

    let pawn_dir = attacker_color.pawn_direction();
    for dc in [-1i8, 1] {
        if let Some(from) = pos.offset(dc, -pawn_dir) {
            if let Some(p) = board.get(from) {
                if p.color == attacker_color && p.kind == PieceKind::Pawn {
                    return true;
                }
            }
        }
    }

    for &(dc, dr) in &BISHOP_DIRS {
        let mut cur = pos;
        while let Some(next) = cur.offset(dc, dr) {
            if let Some(p) = board.get(next) {
                if p.color == attacker_color && (p.kind == PieceKind::Bishop || p.kind == PieceKind::Queen) {
                    return true;
                }
                break;
            }
            cur = next;
        }
    }

    for &(dc, dr) in &ROOK_DIRS {
        let mut cur = pos;
        while let Some(next) = cur.offset(dc, dr) {
            if let Some(p) = board.get(next) {
                if p.color == attacker_color && (p.kind == PieceKind::Rook || p.kind == PieceKind::Queen) {
                    return true;
                }
                break;
            }
            cur = next;
        }
    }

    false
}

pub fn is_in_check(board: &Board, color: Color) -> bool {
    match board.find_king(color) {
        Some(king_pos) => is_square_attacked(board, king_pos, color.opponent()),
        None => false,
    }
}

fn generate_pseudo_legal_moves(
    board: &Board,
    turn: Color,
    castling: &CastlingRights,
    en_passant: Option<Position>,
) -> Vec<Candidate> {
    let mut moves = Vec::with_capacity(64);
    for row in 0..8u8 {
        for col in 0..8u8 {
            let from = Position::new(col, row);
            let piece = match board.get(from) {
                Some(p) if p.color == turn => p,
                _ => continue,
            };
            match piece.kind {
                PieceKind::King => generate_king_moves(board, from, turn, castling, &mut moves),
                PieceKind::Queen => generate_sliding_moves(board, from, turn, &[ROOK_DIRS, BISHOP_DIRS].concat(), &mut moves),
                PieceKind::Rook => generate_sliding_moves(board, from, turn, &ROOK_DIRS, &mut moves),
                PieceKind::Bishop => generate_sliding_moves(board, from, turn, &BISHOP_DIRS, &mut moves),
                PieceKind::Knight => generate_knight_moves(board, from, turn, &mut moves),
                PieceKind::Pawn => generate_pawn_moves(board, from, turn, en_passant, &mut moves),
            }
        }
    }
    moves
}

fn generate_sliding_moves(board: &Board, from: Position, color: Color, dirs: &[(i8, i8)], moves: &mut Vec<Candidate>) {
    for &(dc, dr) in dirs {
        let mut cur = from;
        while let Some(to) = cur.offset(dc, dr) {
            match board.get(to) {
                None => {
                    moves.push(Candidate::simple(from, to));
                    cur = to;
                }
                Some(target) => {
                    if target.color != color {
                        moves.push(Candidate::simple(from, to));
                    }
                    break;
                }
            }
        }
    }
}

fn generate_knight_moves(board: &Board, from: Position, color: Color, moves: &mut Vec<Candidate>) {
    for &(dc, dr) in &KNIGHT_OFFSETS {
        if let Some(to) = from.offset(dc, dr) {
            match board.get(to) {
                None => moves.push(Candidate::simple(from, to)),
                Some(target) if target.color != color => moves.push(Candidate::simple(from, to)),
                _ => {}
            }
        }
    }
}

fn generate_king_moves(board: &Board, from: Position, color: Color, castling: &CastlingRights, moves: &mut Vec<Candidate>) {
    for dc in -1..=1i8 {
        for dr in -1..=1i8 {
            if dc == 0 && dr == 0 {
                continue;
            }
            if let Some(to) = from.offset(dc, dr) {
                match board.get(to) {
                    None => moves.push(Candidate::simple(from, to)),
                    Some(target) if target.color != color => moves.push(Candidate::simple(from, to)),
                    _ => {}
                }
            }
        }
    }

    let rights = castling.for_color(color);
    let row = color.back_rank();
    let king_start = Position::new(4, row);
    let king_piece = board.get(king_start);
    let king_unmoved = matches!(king_piece, Some(p) if p.kind == PieceKind::King && !p.has_moved);
    if from != king_start || !king_unmoved {
        return;
    }
    if is_square_attacked(board, from, color.opponent()) {
        return;
    }

    if rights.kingside {
        let f_sq = Position::new(5, row);
        let g_sq = Position::new(6, row);
        let rook_sq = Position::new(7, row);
        let path_clear = board.get(f_sq).is_none() && board.get(g_sq).is_none();
        let rook_ok = matches!(board.get(rook_sq), Some(p) if p.kind == PieceKind::Rook && p.color == color && !p.has_moved);
        let safe = !is_square_attacked(board, f_sq, color.opponent()) && !is_square_attacked(board, g_sq, color.opponent());
        if path_clear && rook_ok && safe {
            moves.push(Candidate { from, to: g_sq, promotion: None, is_castle_kingside: true, is_castle_queenside: false, is_en_passant: false });
        }
    }

    if rights.queenside {
        let d_sq = Position::new(3, row);
        let c_sq = Position::new(2, row);
        let b_sq = Position::new(1, row);
        let rook_sq = Position::new(0, row);
        let path_clear = board.get(d_sq).is_none() && board.get(c_sq).is_none() && board.get(b_sq).is_none();
        let rook_ok = matches!(board.get(rook_sq), Some(p) if p.kind == PieceKind::Rook && p.color == color && !p.has_moved);
        let safe = !is_square_attacked(board, d_sq, color.opponent()) && !is_square_attacked(board, c_sq, color.opponent());
        if path_clear && rook_ok && safe {
            moves.push(Candidate { from, to: c_sq, promotion: None, is_castle_kingside: false, is_castle_queenside: true, is_en_passant: false });
        }
    }
}

fn generate_pawn_moves(board: &Board, from: Position, color: Color, en_passant: Option<Position>, moves: &mut Vec<Candidate>) {
    let dir = color.pawn_direction();
    let start_row = color.pawn_start_row();
    let promo_row = color.promotion_row();

    let mut push = |to: Position, is_ep: bool, moves: &mut Vec<Candidate>| {
        if to.row == promo_row {
            for kind in [PieceKind::Queen, PieceKind::Rook, PieceKind::Bishop, PieceKind::Knight] {
                moves.push(Candidate { from, to, promotion: Some(kind), is_castle_kingside: false, is_castle_queenside: false, is_en_passant: false });
            }
        } else {
            moves.push(Candidate { from, to, promotion: None, is_castle_kingside: false, is_castle_queenside: false, is_en_passant: is_ep });
        }
    };

    if let Some(one_ahead) = from.offset(0, dir) {
        if board.get(one_ahead).is_none() {
            push(one_ahead, false, moves);
            if from.row == start_row {
                if let Some(two_ahead) = from.offset(0, dir * 2) {
                    if board.get(two_ahead).is_none() {
                        push(two_ahead, false, moves);
                    }
                }
            }
        }
    }

    for dc in [-1i8, 1] {
        if let Some(to) = from.offset(dc, dir) {
            if let Some(target) = board.get(to) {
                if target.color != color {
                    push(to, false, moves);
                }
            }
            if en_passant == Some(to) {
                push(to, true, moves);
            }
        }
    }
}

/// Applies a pseudo-legal candidate to a board clone, for legality testing
/// and for actually committing moves. Updates `has_moved` and mints a fresh
/// piece identity on promotion.
fn apply_candidate(board: &mut Board, c: &Candidate, color: Color) {
    let mut piece = board.get(c.from).expect("candidate references an empty origin square");
    board.set(c.from, None);

    if c.is_castle_kingside || c.is_castle_queenside {
        let row = c.from.row;
        let (rook_from, rook_to) = if c.is_castle_kingside {
            (Position::new(7, row), Position::new(5, row))
        } else {
            (Position::new(0, row), Position::new(3, row))
        };
        let mut rook = board.get(rook_from).expect("castling candidate with no rook");
        rook.has_moved = true;
        board.set(rook_from, None);
        board.set(rook_to, Some(rook));
    }

    if c.is_en_passant {
        let captured_row = match color {
            Color::White => c.to.row - 1,
            Color::Black => c.to.row + 1,
        };
        board.set(Position::new(c.to.col, captured_row), None);
    }

    piece.has_moved = true;
    if let Some(promo_kind) = c.promotion {
        let id = board.mint_piece_id();
        piece.id = id;
        piece.kind = promo_kind;
    }
    board.set(c.to, Some(piece));
}

/// All legal moves for `turn` (pseudo-legal, filtered by king safety).
pub fn generate_legal_candidates(board: &Board, turn: Color, castling: &CastlingRights, en_passant: Option<Position>) -> Vec<Candidate> {
    generate_pseudo_legal_moves(board, turn, castling, en_passant)
        .into_iter()
        .filter(|c| {
            let mut test = board.clone();
            apply_candidate(&mut test, c, turn);
            !is_in_check(&test, turn)
        })
        .collect()
}

/// Public view of a legal move's origin/destination/promotion, for SAN
/// disambiguation and for exposing "legal moves for this square" queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegalMove {
    pub from: Position,
    pub to: Position,
    pub promotion: Option<PieceKind>,
}

/// All legal moves for `turn`. Used by `GameSession` both to reject illegal
/// requests with a precise error and to compute SAN disambiguation.
pub fn legal_moves(board: &Board, turn: Color, castling: &CastlingRights, en_passant: Option<Position>) -> Vec<LegalMove> {
    generate_legal_candidates(board, turn, castling, en_passant)
        .into_iter()
        .map(|c| LegalMove { from: c.from, to: c.to, promotion: c.promotion })
        .collect()
}

pub fn is_checkmate(board: &Board, turn: Color, castling: &CastlingRights, en_passant: Option<Position>) -> bool {
    is_in_check(board, turn) && generate_legal_candidates(board, turn, castling, en_passant).is_empty()
}

pub fn is_stalemate(board: &Board, turn: Color, castling: &CastlingRights, en_passant: Option<Position>) -> bool {
    !is_in_check(board, turn) && generate_legal_candidates(board, turn, castling, en_passant).is_empty()
}

/// K vs K; K+minor vs K; K+B vs K+B with both bishops on same-colored squares.
pub fn is_insufficient_material(board: &Board) -> bool {
    let pieces = board.pieces();
    let white: Vec<_> = pieces.iter().filter(|p| p.color == Color::White && p.kind != PieceKind::King).collect();
    let black: Vec<_> = pieces.iter().filter(|p| p.color == Color::Black && p.kind != PieceKind::King).collect();

    if white.is_empty() && black.is_empty() {
        return true;
    }
    if white.is_empty() && black.len() == 1 {
        let k = black[0].kind;
        return k == PieceKind::Bishop || k == PieceKind::Knight;
    }
    if black.is_empty() && white.len() == 1 {
        let k = white[0].kind;
        return k == PieceKind::Bishop || k == PieceKind::Knight;
    }
    if white.len() == 1 && black.len() == 1 && white[0].kind == PieceKind::Bishop && black[0].kind == PieceKind::Bishop {
        let wc = (white[0].position.col + white[0].position.row) % 2;
        let bc = (black[0].position.col + black[0].position.row) % 2;
        return wc == bc;
    }
    false
}

/// Validates `from -> to [promotion]` for `mover_color` and, if legal,
/// returns the fully-flagged [`Move`] plus the resulting board (piece
/// placement only — clocks, castling-rights bookkeeping, and en passant
/// target are the caller's, per `spec.md` §4.2).
pub fn validate_move(
    board: &Board,
    from: Position,
    to: Position,
    promotion: Option<PieceKind>,
    mover_color: Color,
    castling: &CastlingRights,
    en_passant: Option<Position>,
    now_ms: i64,
    client_requested_at: Option<i64>,
) -> Result<(Move, Board), MoveError> {
    let piece = board.get(from).ok_or(MoveError::InvalidPiece)?;
    if piece.color != mover_color {
        return Err(MoveError::NotYourTurn);
    }

    let candidates = generate_pseudo_legal_moves(board, mover_color, castling, en_passant);
    let matching: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.from == from && c.to == to)
        .collect();

    if matching.is_empty() {
        // Disambiguate the failure the way spec.md §4.1 enumerates them.
        if piece.kind == PieceKind::King && (to.col as i8 - from.col as i8).abs() == 2 {
            return Err(MoveError::InvalidCastling);
        }
        if piece.kind == PieceKind::Pawn && Some(to) == en_passant {
            return Err(MoveError::InvalidEnPassant);
        }
        return Err(MoveError::PathBlocked);
    }

    let reaches_promo_row = to.row == mover_color.promotion_row() && piece.kind == PieceKind::Pawn;
    let candidate = if reaches_promo_row {
        let kind = promotion.ok_or(MoveError::InvalidPromotion)?;
        if !matches!(kind, PieceKind::Queen | PieceKind::Rook | PieceKind::Bishop | PieceKind::Knight) {
            return Err(MoveError::InvalidPromotion);
        }
        matching
            .into_iter()
            .find(|c| c.promotion == Some(kind))
            .ok_or(MoveError::InvalidPromotion)?
    } else {
        if promotion.is_some() {
            return Err(MoveError::InvalidPromotion);
        }
        matching[0]
    };

    let captured_piece = if candidate.is_en_passant {
        let captured_row = match mover_color {
            Color::White => to.row - 1,
            Color::Black => to.row + 1,
        };
        board.get(Position::new(to.col, captured_row))
    } else {
        board.get(to)
    };

    let mut next_board = board.clone();
    apply_candidate(&mut next_board, candidate, mover_color);

    if is_in_check(&next_board, mover_color) {
        return Err(MoveError::WouldBeInCheck);
    }

    let mut flags = Vec::new();
    if captured_piece.is_some() {
        flags.push(MoveFlag::Capture);
    }
    if candidate.is_en_passant {
        flags.push(MoveFlag::EnPassant);
    }
    if candidate.is_castle_kingside {
        flags.push(MoveFlag::CastleKingside);
    }
    if candidate.is_castle_queenside {
        flags.push(MoveFlag::CastleQueenside);
    }
    if candidate.promotion.is_some() {
        flags.push(MoveFlag::PawnPromotion);
    }
    if piece.kind == PieceKind::Pawn && (to.row as i8 - from.row as i8).abs() == 2 {
        flags.push(MoveFlag::DoublePawnPush);
    }

    let next_en_passant = if flags.contains(&MoveFlag::DoublePawnPush) {
        let behind_row = (from.row as i8 + mover_color.pawn_direction()) as u8;
        Some(Position::new(from.col, behind_row))
    } else {
        None
    };

    let opponent = mover_color.opponent();
    if is_in_check(&next_board, opponent) {
        flags.push(MoveFlag::Check);
        if is_checkmate(&next_board, opponent, castling, next_en_passant) {
            flags.push(MoveFlag::Checkmate);
        }
    }

    let mv = Move {
        from,
        to,
        piece_type: piece.kind,
        player_color: mover_color,
        promotion_type: candidate.promotion,
        flags,
        captured_piece,
        client_requested_at,
        validated_at: now_ms,
    };

    Ok((mv, next_board))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::types::Board;

    #[test]
    fn starting_position_has_twenty_legal_moves() {
        let board = Board::starting_position();
        let moves = generate_legal_candidates(&board, Color::White, &CastlingRights::default(), None);
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn starting_position_not_in_check() {
        let board = Board::starting_position();
        assert!(!is_in_check(&board, Color::White));
        assert!(!is_in_check(&board, Color::Black));
    }

    #[test]
    fn insufficient_material_k_vs_k() {
        let mut board = Board::empty();
        let wid = board.mint_piece_id();
        board.set(Position::new(4, 0), Some(crate::chess::types::Piece { id: wid, kind: PieceKind::King, color: Color::White, position: Position::new(4, 0), has_moved: true }));
        let bid = board.mint_piece_id();
        board.set(Position::new(4, 7), Some(crate::chess::types::Piece { id: bid, kind: PieceKind::King, color: Color::Black, position: Position::new(4, 7), has_moved: true }));
        assert!(is_insufficient_material(&board));
    }

    #[test]
    fn stalemate_position() {
        // 7k/5Q2/6K1/8/8/8/8/8 b - - 0 1
        let parsed = Board::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert!(!is_in_check(&parsed.board, Color::Black));
        assert!(is_stalemate(&parsed.board, Color::Black, &parsed.castling, parsed.en_passant));
    }

    #[test]
    fn en_passant_capture() {
        let parsed = Board::from_fen("rnbqkbnr/ppp1pppp/8/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2").unwrap();
        let (mv, next) = validate_move(
            &parsed.board,
            Position::from_algebraic("e5").unwrap(),
            Position::from_algebraic("d6").unwrap(),
            None,
            Color::White,
            &parsed.castling,
            parsed.en_passant,
            0,
            None,
        )
        .unwrap();
        assert!(mv.has_flag(MoveFlag::EnPassant));
        assert!(mv.has_flag(MoveFlag::Capture));
        assert!(next.get(Position::from_algebraic("d5").unwrap()).is_none());
    }

    #[test]
    fn castling_blocked_by_check_on_transit_square() {
        let mut board = Board::empty();
        let wk = board.mint_piece_id();
        board.set(Position::new(4, 0), Some(crate::chess::types::Piece { id: wk, kind: PieceKind::King, color: Color::White, position: Position::new(4, 0), has_moved: false }));
        let wr = board.mint_piece_id();
        board.set(Position::new(7, 0), Some(crate::chess::types::Piece { id: wr, kind: PieceKind::Rook, color: Color::White, position: Position::new(7, 0), has_moved: false }));
        let bk = board.mint_piece_id();
        board.set(Position::new(4, 7), Some(crate::chess::types::Piece { id: bk, kind: PieceKind::King, color: Color::Black, position: Position::new(4, 7), has_moved: false }));
        // Black rook attacks f1 (the king's transit square for O-O).
        let br = board.mint_piece_id();
        board.set(Position::new(5, 6), Some(crate::chess::types::Piece { id: br, kind: PieceKind::Rook, color: Color::Black, position: Position::new(5, 6), has_moved: false }));

        let castling = CastlingRights {
            white: crate::chess::types::SideCastlingRights { kingside: true, queenside: false },
            black: crate::chess::types::SideCastlingRights { kingside: false, queenside: false },
        };

        let result = validate_move(
            &board,
            Position::new(4, 0),
            Position::new(6, 0),
            None,
            Color::White,
            &castling,
            None,
            0,
            None,
        );
        assert_eq!(result.unwrap_err(), MoveError::InvalidCastling);
    }
}
