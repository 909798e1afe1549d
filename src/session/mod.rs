//! The authoritative per-game state machine: board, clocks, history, and
//! terminal detection.
//!
//! Generalizes `checkai`'s `game.rs` `Game` struct (`make_move`,
//! `process_action`, `check_game_end_conditions`,
//! `count_position_repetitions`) with clock accounting and
//! disconnect/timeout transitions the teacher never modeled, since it has no
//! networking-aware session events.

use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chess::pgn::{self, PgnMove};
use crate::chess::validator;
use crate::chess::{Board, CastlingRights, Color, Move, MoveFlag, PieceKind, Position};
use crate::error::SessionError;

/// A snapshot of one player as the session cares about them: identity,
/// display name, and the rating they brought into the game (used for both
/// the PGN headers and the Elo pipeline downstream in `GameManager`).
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub username: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Waiting,
    InProgress,
    WhiteWon,
    BlackWon,
    Draw,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
    Resignation,
    Agreement,
    Timeout,
    Disconnection,
    Aborted,
}

/// One played ply plus the notation and position key derived from it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub mv: Move,
    pub san: String,
    pub position_key: String,
    pub fen_after: String,
}

/// A consistent read of every session field, for building wire messages.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    pub game_id: Uuid,
    pub fen: String,
    pub turn: Color,
    pub status: GameStatus,
    pub end_reason: Option<GameEndReason>,
    pub white_time_ms: i64,
    pub black_time_ms: i64,
    pub move_sequence: u64,
    pub winner: Option<Color>,
    pub move_count: usize,
}

struct SessionState {
    board: Board,
    turn: Color,
    castling: CastlingRights,
    en_passant: Option<Position>,
    halfmove_clock: u32,
    fullmove_number: u32,
    white_time_ms: i64,
    black_time_ms: i64,
    last_move_at: Option<i64>,
    started_at: Option<i64>,
    status: GameStatus,
    end_reason: Option<GameEndReason>,
    move_sequence: u64,
    history: Vec<HistoryEntry>,
    position_history: Vec<String>,
    draw_offered_by: Option<Color>,
}

/// Fifty-move rule threshold in half-moves (plies since the last capture or
/// pawn move).
const FIFTY_MOVE_PLIES: u32 = 100;

/// One authoritative game. All mutation happens under `inner`, a single
/// per-session mutual-exclusion region (`spec.md` §4.2: "all mutations
/// serialize on a per-session lock").
pub struct GameSession {
    pub game_id: Uuid,
    pub white: PlayerSnapshot,
    pub black: PlayerSnapshot,
    pub initial_time_ms: i64,
    pub increment_ms: i64,
    pub time_control: String,
    inner: Mutex<SessionState>,
}

impl GameSession {
    pub fn new(game_id: Uuid, white: PlayerSnapshot, black: PlayerSnapshot, initial_time_ms: i64, increment_ms: i64, time_control: String) -> Self {
        let board = Board::starting_position();
        let castling = CastlingRights::default();
        let starting_key = board.position_key(Color::White, &castling, None);
        Self {
            game_id,
            white,
            black,
            initial_time_ms,
            increment_ms,
            time_control,
            inner: Mutex::new(SessionState {
                board,
                turn: Color::White,
                castling,
                en_passant: None,
                halfmove_clock: 0,
                fullmove_number: 1,
                white_time_ms: initial_time_ms,
                black_time_ms: initial_time_ms,
                last_move_at: None,
                started_at: None,
                status: GameStatus::Waiting,
                end_reason: None,
                move_sequence: 0,
                history: Vec::new(),
                position_history: vec![starting_key],
                draw_offered_by: None,
            }),
        }
    }

    fn player_snapshot(&self, color: Color) -> &PlayerSnapshot {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    pub async fn start(&self, now_ms: i64) {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::Waiting {
            return;
        }
        s.status = GameStatus::InProgress;
        s.started_at = Some(now_ms);
        s.last_move_at = Some(now_ms);
    }

    /// The color whose move it currently is, the board, castling rights and
    /// en passant target, and the elapsed-time budget — everything
    /// `GameManager` needs to call the validator before committing a move.
    pub async fn board_state(&self) -> (Board, Color, CastlingRights, Option<Position>, Option<i64>, i64) {
        let s = self.inner.lock().await;
        let remaining = match s.turn {
            Color::White => s.white_time_ms,
            Color::Black => s.black_time_ms,
        };
        (s.board.clone(), s.turn, s.castling, s.en_passant, s.last_move_at, remaining)
    }

    pub async fn status(&self) -> GameStatus {
        self.inner.lock().await.status
    }

    /// Applies a move already produced by `validator::validate_move` against
    /// this session's board. Advances clocks, records history, updates
    /// castling rights and the en passant target, and runs terminal
    /// detection — checkmate/stalemate/insufficient material/fifty-move/
    /// threefold repetition, in that order.
    pub async fn apply_validated_move(&self, mv: Move, board_after: Board, elapsed_ms: i64, now_ms: i64) -> Result<GameSnapshot, SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Err(SessionError::GameNotInProgress);
        }
        if mv.player_color != s.turn {
            return Err(SessionError::NotYourTurn);
        }

        let disambiguation = disambiguate(&s.board, s.turn, &s.castling, s.en_passant, &mv);

        let mover_clock = match s.turn {
            Color::White => &mut s.white_time_ms,
            Color::Black => &mut s.black_time_ms,
        };
        *mover_clock = (*mover_clock - elapsed_ms + self.increment_ms).max(0);

        update_castling_rights(&mut s.castling, &mv);
        s.en_passant = next_en_passant(&mv);
        if mv.has_flag(MoveFlag::Capture) || mv.piece_type == PieceKind::Pawn {
            s.halfmove_clock = 0;
        } else {
            s.halfmove_clock += 1;
        }
        if s.turn == Color::Black {
            s.fullmove_number += 1;
        }
        let next_turn = s.turn.opponent();

        s.board = board_after;
        s.turn = next_turn;
        s.last_move_at = Some(now_ms);
        s.move_sequence += 1;
        s.draw_offered_by = None;

        let position_key = s.board.position_key(s.turn, &s.castling, s.en_passant);
        let fen_after = s.board.to_fen(s.turn, &s.castling, s.en_passant, s.halfmove_clock, s.fullmove_number);
        let san = pgn::to_san(&PgnMove { mv: mv.clone(), disambiguate_col: disambiguation.0, disambiguate_row: disambiguation.1 });
        s.history.push(HistoryEntry { mv, san, position_key: position_key.clone(), fen_after: fen_after.clone() });
        s.position_history.push(position_key.clone());

        if s.status == GameStatus::InProgress {
            let repetitions = s.position_history.iter().filter(|k| **k == position_key).count();
            if validator::is_checkmate(&s.board, s.turn, &s.castling, s.en_passant) {
                s.status = if s.turn == Color::White { GameStatus::BlackWon } else { GameStatus::WhiteWon };
                s.end_reason = Some(GameEndReason::Checkmate);
            } else if validator::is_stalemate(&s.board, s.turn, &s.castling, s.en_passant) {
                s.status = GameStatus::Draw;
                s.end_reason = Some(GameEndReason::Stalemate);
            } else if validator::is_insufficient_material(&s.board) {
                s.status = GameStatus::Draw;
                s.end_reason = Some(GameEndReason::InsufficientMaterial);
            } else if s.halfmove_clock >= FIFTY_MOVE_PLIES {
                s.status = GameStatus::Draw;
                s.end_reason = Some(GameEndReason::FiftyMoveRule);
            } else if repetitions >= 3 {
                s.status = GameStatus::Draw;
                s.end_reason = Some(GameEndReason::ThreefoldRepetition);
            }
        }

        Ok(snapshot_from(self.game_id, &s))
    }

    pub async fn offer_draw(&self, color: Color) -> Result<(), SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Err(SessionError::GameNotInProgress);
        }
        s.draw_offered_by = Some(color);
        Ok(())
    }

    pub async fn decline_draw(&self) -> Result<(), SessionError> {
        let mut s = self.inner.lock().await;
        s.draw_offered_by = None;
        Ok(())
    }

    pub async fn accept_draw(&self) -> Result<GameSnapshot, SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Err(SessionError::GameNotInProgress);
        }
        if s.draw_offered_by.is_none() {
            return Err(SessionError::NoDrawOffer);
        }
        s.status = GameStatus::Draw;
        s.end_reason = Some(GameEndReason::Agreement);
        s.draw_offered_by = None;
        Ok(snapshot_from(self.game_id, &s))
    }

    pub async fn resign(&self, color: Color) -> Result<GameSnapshot, SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Ok(snapshot_from(self.game_id, &s));
        }
        s.status = if color == Color::White { GameStatus::BlackWon } else { GameStatus::WhiteWon };
        s.end_reason = Some(GameEndReason::Resignation);
        Ok(snapshot_from(self.game_id, &s))
    }

    pub async fn timeout_of(&self, color: Color) -> Result<GameSnapshot, SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Ok(snapshot_from(self.game_id, &s));
        }
        match color {
            Color::White => s.white_time_ms = 0,
            Color::Black => s.black_time_ms = 0,
        }
        s.status = if color == Color::White { GameStatus::BlackWon } else { GameStatus::WhiteWon };
        s.end_reason = Some(GameEndReason::Timeout);
        Ok(snapshot_from(self.game_id, &s))
    }

    pub async fn disconnect(&self, color: Color) -> Result<GameSnapshot, SessionError> {
        let mut s = self.inner.lock().await;
        if s.status != GameStatus::InProgress {
            return Ok(snapshot_from(self.game_id, &s));
        }
        s.status = if color == Color::White { GameStatus::BlackWon } else { GameStatus::WhiteWon };
        s.end_reason = Some(GameEndReason::Disconnection);
        Ok(snapshot_from(self.game_id, &s))
    }

    pub async fn abort(&self) -> GameSnapshot {
        let mut s = self.inner.lock().await;
        if s.status == GameStatus::Waiting || s.status == GameStatus::InProgress {
            s.status = GameStatus::Aborted;
            s.end_reason = Some(GameEndReason::Aborted);
        }
        snapshot_from(self.game_id, &s)
    }

    pub async fn is_threefold_repetition(&self) -> bool {
        let s = self.inner.lock().await;
        let current = s.position_history.last();
        match current {
            Some(key) => s.position_history.iter().filter(|k| *k == key).count() >= 3,
            None => false,
        }
    }

    pub async fn is_fifty_move_rule(&self) -> bool {
        self.inner.lock().await.halfmove_clock >= FIFTY_MOVE_PLIES
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        let s = self.inner.lock().await;
        snapshot_from(self.game_id, &s)
    }

    /// Renders the finished (or in-progress) game as PGN. Pure given the
    /// stored history and player snapshots — see `spec.md` §9's note on
    /// breaking the `GameSession`↔PGN-generator cycle.
    pub async fn to_pgn(&self, date: Option<(u32, u32, u32)>) -> String {
        let s = self.inner.lock().await;
        let moves: Vec<PgnMove> = s
            .history
            .iter()
            .map(|h| PgnMove { mv: h.mv.clone(), disambiguate_col: false, disambiguate_row: false })
            .collect();
        let (winner, is_draw) = winner_and_draw(s.status);
        let termination = s.end_reason.map(termination_label);
        pgn::format_pgn(&moves, &self.white.username, &self.black.username, winner, is_draw, termination, date)
    }

    pub async fn move_history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().await.history.clone()
    }
}

fn snapshot_from(game_id: Uuid, s: &SessionState) -> GameSnapshot {
    let fen = s.board.to_fen(s.turn, &s.castling, s.en_passant, s.halfmove_clock, s.fullmove_number);
    let (winner, _) = winner_and_draw(s.status);
    GameSnapshot {
        game_id,
        fen,
        turn: s.turn,
        status: s.status,
        end_reason: s.end_reason,
        white_time_ms: s.white_time_ms,
        black_time_ms: s.black_time_ms,
        move_sequence: s.move_sequence,
        winner,
        move_count: s.history.len(),
    }
}

fn winner_and_draw(status: GameStatus) -> (Option<Color>, bool) {
    match status {
        GameStatus::WhiteWon => (Some(Color::White), false),
        GameStatus::BlackWon => (Some(Color::Black), false),
        GameStatus::Draw => (None, true),
        _ => (None, false),
    }
}

fn termination_label(reason: GameEndReason) -> &'static str {
    match reason {
        GameEndReason::Checkmate => "Normal",
        GameEndReason::Stalemate => "Normal",
        GameEndReason::InsufficientMaterial => "Normal",
        GameEndReason::FiftyMoveRule => "Normal",
        GameEndReason::ThreefoldRepetition => "Normal",
        GameEndReason::Resignation => "Normal",
        GameEndReason::Agreement => "Normal",
        GameEndReason::Timeout => "Time forfeit",
        GameEndReason::Disconnection => "Abandoned",
        GameEndReason::Aborted => "Abandoned",
    }
}

/// Strips castling rights when a king moves, a rook leaves its origin
/// square, or a rook is captured on its origin square — resolving
/// `spec.md` §9's open question by stripping on either vacate or capture.
fn update_castling_rights(rights: &mut CastlingRights, mv: &Move) {
    if mv.piece_type == PieceKind::King {
        let side = rights.for_color_mut(mv.player_color);
        side.kingside = false;
        side.queenside = false;
    }
    for sq in [mv.from, mv.to] {
        match (sq.col, sq.row) {
            (0, 0) => rights.white.queenside = false,
            (7, 0) => rights.white.kingside = false,
            (0, 7) => rights.black.queenside = false,
            (7, 7) => rights.black.kingside = false,
            _ => {}
        }
    }
}

fn next_en_passant(mv: &Move) -> Option<Position> {
    if !mv.has_flag(MoveFlag::DoublePawnPush) {
        return None;
    }
    let dir = mv.player_color.pawn_direction();
    let behind_row = (mv.from.row as i8 + dir) as u8;
    Some(Position::new(mv.from.col, behind_row))
}

/// Computes SAN disambiguation (file-only, rank-only, or both) by comparing
/// against every other legal move of the same piece kind landing on the
/// same square, per the standard SAN tie-breaking rule.
fn disambiguate(board: &Board, turn: Color, castling: &CastlingRights, en_passant: Option<Position>, mv: &Move) -> (bool, bool) {
    if mv.piece_type == PieceKind::Pawn || mv.piece_type == PieceKind::King {
        return (false, false);
    }
    let others: Vec<Position> = validator::legal_moves(board, turn, castling, en_passant)
        .into_iter()
        .filter(|m| m.to == mv.to && m.from != mv.from)
        .filter(|m| board.get(m.from).map(|p| p.kind) == Some(mv.piece_type))
        .map(|m| m.from)
        .collect();

    if others.is_empty() {
        return (false, false);
    }
    let same_col = others.iter().any(|p| p.col == mv.from.col);
    let same_row = others.iter().any(|p| p.row == mv.from.row);
    if !same_col {
        (true, false)
    } else if !same_row {
        (false, true)
    } else {
        (true, true)
    }
}

/// Registry of live sessions keyed by game id, for `GameManager`.
pub type SessionMap = HashMap<Uuid, std::sync::Arc<GameSession>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::validator::validate_move;

    fn white() -> PlayerSnapshot {
        PlayerSnapshot { id: Uuid::new_v4(), username: "alice".into(), rating: 1200 }
    }
    fn black() -> PlayerSnapshot {
        PlayerSnapshot { id: Uuid::new_v4(), username: "bob".into(), rating: 1200 }
    }

    async fn apply(session: &GameSession, from: &str, to: &str, promo: Option<PieceKind>) -> GameSnapshot {
        let (board, turn, castling, ep, _, _) = session.board_state().await;
        let (mv, next_board) = validate_move(
            &board,
            Position::from_algebraic(from).unwrap(),
            Position::from_algebraic(to).unwrap(),
            promo,
            turn,
            &castling,
            ep,
            0,
            None,
        )
        .unwrap();
        session.apply_validated_move(mv, next_board, 0, 0).await.unwrap()
    }

    #[tokio::test]
    async fn scholars_mate_ends_in_checkmate() {
        let session = GameSession::new(Uuid::new_v4(), white(), black(), 300_000, 0, "blitz".into());
        session.start(0).await;
        apply(&session, "e2", "e4", None).await;
        apply(&session, "e7", "e5", None).await;
        apply(&session, "f1", "c4", None).await;
        apply(&session, "b8", "c6", None).await;
        apply(&session, "d1", "h5", None).await;
        apply(&session, "g8", "f6", None).await;
        let snap = apply(&session, "h5", "f7", None).await;
        assert_eq!(snap.status, GameStatus::WhiteWon);
        assert!(snap.fen.starts_with("r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq -"));
    }

    #[tokio::test]
    async fn resignation_is_idempotent_after_terminal() {
        let session = GameSession::new(Uuid::new_v4(), white(), black(), 300_000, 0, "blitz".into());
        session.start(0).await;
        let snap = session.resign(Color::White).await.unwrap();
        assert_eq!(snap.status, GameStatus::BlackWon);
        let snap2 = session.resign(Color::Black).await.unwrap();
        assert_eq!(snap2.status, GameStatus::BlackWon);
    }

    #[tokio::test]
    async fn threefold_repetition_draws_after_eighth_ply() {
        let session = GameSession::new(Uuid::new_v4(), white(), black(), 300_000, 0, "blitz".into());
        session.start(0).await;
        apply(&session, "g1", "f3", None).await;
        apply(&session, "g8", "f6", None).await;
        apply(&session, "f3", "g1", None).await;
        apply(&session, "f6", "g8", None).await;
        apply(&session, "g1", "f3", None).await;
        apply(&session, "g8", "f6", None).await;
        apply(&session, "f3", "g1", None).await;
        let final_snap = apply(&session, "f6", "g8", None).await;
        assert_eq!(final_snap.status, GameStatus::Draw);
        assert_eq!(final_snap.end_reason, Some(GameEndReason::ThreefoldRepetition));
    }

    #[tokio::test]
    async fn timeout_zeroes_the_flagged_players_clock() {
        let session = GameSession::new(Uuid::new_v4(), white(), black(), 1_000, 0, "bullet".into());
        session.start(0).await;
        let snap = session.timeout_of(Color::White).await.unwrap();
        assert_eq!(snap.status, GameStatus::BlackWon);
        assert_eq!(snap.end_reason, Some(GameEndReason::Timeout));
        assert_eq!(snap.white_time_ms, 0);
    }

    #[tokio::test]
    async fn accept_draw_without_offer_is_rejected() {
        let session = GameSession::new(Uuid::new_v4(), white(), black(), 300_000, 0, "blitz".into());
        session.start(0).await;
        let err = session.accept_draw().await.unwrap_err();
        assert_eq!(err, SessionError::NoDrawOffer);
    }
}
