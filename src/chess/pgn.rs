//! Standard Algebraic Notation and PGN generation.
//!
//! `spec.md` §1 is explicit that this direction only is in scope ("no PGN
//! parser (only generator)"). Grounded in `checkai`'s `export.rs`
//! (`format_pgn`/`wrap_pgn_text`), generalized from the teacher's coordinate
//! notation (`e2e4`) to proper SAN (`Nf3`, `O-O`, `exd5`, `e8=Q+`), and made a
//! pure function of the move history plus the two players' names and the
//! final status, per `spec.md` §9's note on breaking the cycle between
//! `GameSession` and the PGN generator.

use crate::chess::types::{Color, Move, MoveFlag, PieceKind};

/// One already-played ply, carrying enough to render both SAN and PGN.
#[derive(Debug, Clone)]
pub struct PgnMove {
    pub mv: Move,
    /// Disambiguation column/row needed because another like piece could
    /// also reach the destination (computed by the caller, which has the
    /// full legal-move list for that ply).
    pub disambiguate_col: bool,
    pub disambiguate_row: bool,
}

/// Renders one ply in Standard Algebraic Notation.
pub fn to_san(m: &PgnMove) -> String {
    let mv = &m.mv;

    if mv.has_flag(MoveFlag::CastleKingside) {
        return append_suffix("O-O", mv);
    }
    if mv.has_flag(MoveFlag::CastleQueenside) {
        return append_suffix("O-O-O", mv);
    }

    let mut s = String::new();
    let is_pawn = mv.piece_type == PieceKind::Pawn;
    let is_capture = mv.has_flag(MoveFlag::Capture);

    if is_pawn {
        if is_capture {
            s.push((b'a' + mv.from.col) as char);
        }
    } else {
        s.push(piece_letter(mv.piece_type));
        if m.disambiguate_col {
            s.push((b'a' + mv.from.col) as char);
        }
        if m.disambiguate_row {
            s.push((b'1' + mv.from.row) as char);
        }
    }

    if is_capture {
        s.push('x');
    }
    s.push_str(&mv.to.to_algebraic());

    if let Some(promo) = mv.promotion_type {
        s.push('=');
        s.push(piece_letter(promo));
    }

    append_suffix(&s, mv)
}

fn append_suffix(s: &str, mv: &Move) -> String {
    let mut s = s.to_string();
    if mv.has_flag(MoveFlag::Checkmate) {
        s.push('#');
    } else if mv.has_flag(MoveFlag::Check) {
        s.push('+');
    }
    s
}

fn piece_letter(kind: PieceKind) -> char {
    match kind {
        PieceKind::King => 'K',
        PieceKind::Queen => 'Q',
        PieceKind::Rook => 'R',
        PieceKind::Bishop => 'B',
        PieceKind::Knight => 'N',
        PieceKind::Pawn => unreachable!("pawns have no piece letter in SAN"),
    }
}

/// Result tag used in both the `[Result ...]` header and the trailing
/// movetext token.
pub fn result_tag(winner: Option<Color>, is_draw: bool) -> &'static str {
    if is_draw {
        "1/2-1/2"
    } else {
        match winner {
            Some(Color::White) => "1-0",
            Some(Color::Black) => "0-1",
            None => "*",
        }
    }
}

/// Assembles a full PGN document. Pure function of the move list, the two
/// player names, and the outcome — no board or session state needed.
pub fn format_pgn(
    moves: &[PgnMove],
    white_name: &str,
    black_name: &str,
    winner: Option<Color>,
    is_draw: bool,
    termination: Option<&str>,
    date: Option<(u32, u32, u32)>,
) -> String {
    let mut out = String::new();
    out.push_str("[Event \"Chessd Game\"]\n");
    out.push_str("[Site \"Chessd Server\"]\n");
    match date {
        Some((y, mo, d)) => out.push_str(&format!("[Date \"{y:04}.{mo:02}.{d:02}\"]\n")),
        None => out.push_str("[Date \"????.??.??\"]\n"),
    }
    out.push_str("[Round \"1\"]\n");
    out.push_str(&format!("[White \"{white_name}\"]\n"));
    out.push_str(&format!("[Black \"{black_name}\"]\n"));
    let tag = result_tag(winner, is_draw);
    out.push_str(&format!("[Result \"{tag}\"]\n"));
    if let Some(reason) = termination {
        out.push_str(&format!("[Termination \"{reason}\"]\n"));
    }
    out.push('\n');

    let mut movetext = String::new();
    for (i, m) in moves.iter().enumerate() {
        if i % 2 == 0 {
            if !movetext.is_empty() {
                movetext.push(' ');
            }
            movetext.push_str(&format!("{}.", i / 2 + 1));
        }
        movetext.push(' ');
        movetext.push_str(&to_san(m));
    }
    if !movetext.is_empty() {
        movetext.push(' ');
    }
    movetext.push_str(tag);

    out.push_str(&wrap(&movetext, 80));
    out.push('\n');
    out
}

fn wrap(text: &str, max_width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;
    for word in text.split_whitespace() {
        if line_len > 0 && line_len + 1 + word.len() > max_width {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::types::{Move, Position};

    fn simple_move(from: &str, to: &str, piece: PieceKind, flags: Vec<MoveFlag>) -> PgnMove {
        PgnMove {
            mv: Move {
                from: Position::from_algebraic(from).unwrap(),
                to: Position::from_algebraic(to).unwrap(),
                piece_type: piece,
                player_color: Color::White,
                promotion_type: None,
                flags,
                captured_piece: None,
                client_requested_at: None,
                validated_at: 0,
            },
            disambiguate_col: false,
            disambiguate_row: false,
        }
    }

    #[test]
    fn pawn_push_san() {
        let m = simple_move("e2", "e4", PieceKind::Pawn, vec![MoveFlag::DoublePawnPush]);
        assert_eq!(to_san(&m), "e4");
    }

    #[test]
    fn knight_move_san() {
        let m = simple_move("g1", "f3", PieceKind::Knight, vec![]);
        assert_eq!(to_san(&m), "Nf3");
    }

    #[test]
    fn castle_kingside_san() {
        let m = simple_move("e1", "g1", PieceKind::King, vec![MoveFlag::CastleKingside]);
        assert_eq!(to_san(&m), "O-O");
    }

    #[test]
    fn checkmate_suffix() {
        let m = simple_move("h5", "f7", PieceKind::Queen, vec![MoveFlag::Capture, MoveFlag::Check, MoveFlag::Checkmate]);
        assert_eq!(to_san(&m), "Qxf7#");
    }
}
