//! Glues the connection layer to sessions: owns the three registries named
//! in `spec.md` §4.3, applies moves through the validator, runs the
//! end-of-game pipeline (Elo, persistence, registry cleanup, notification),
//! and runs the 1 s timeout-monitor sweep.
//!
//! Grounded in `checkai`'s `GameManager` (`game.rs`: a `HashMap<Uuid, Game>`
//! registry plus `create_game`/`get_game_mut`/`persist_game`/`delete_game`),
//! generalized to the three registries the spec names and the rating
//! pipeline the teacher has no concept of.

pub mod elo;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::chess::validator::validate_move;
use crate::chess::{Color, Position};
use crate::config::RatingConfig;
use crate::error::SessionError;
use crate::session::{GameEndReason, GameSession, GameSnapshot, GameStatus, PlayerSnapshot};
use crate::storage::{GameResult, GameStore, MatchResult, PlayerStore};

/// Notifications the manager pushes to whatever owns live connections
/// (`ConnectionHub`). One-shot, at-least-once delivery to the two
/// recipients named in each variant — `spec.md` §9's replacement for the
/// teacher's `EventHandler<T>` coupling.
#[derive(Debug, Clone)]
pub enum GameEvent {
    GameStarted { game_id: Uuid, white: Uuid, black: Uuid, snapshot: GameSnapshot },
    MoveApplied { game_id: Uuid, white: Uuid, black: Uuid, san: String, snapshot: GameSnapshot },
    DrawOffered { game_id: Uuid, white: Uuid, black: Uuid, offered_by: Color },
    GameEnded { game_id: Uuid, white: Uuid, black: Uuid, snapshot: GameSnapshot, white_rating_delta: i32, black_rating_delta: i32 },
}

/// The response to a `MoveRequest`, mirroring the wire `MoveResponse`
/// payload (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct MoveResponse {
    pub success: bool,
    pub error: Option<String>,
    pub san: Option<String>,
    pub snapshot: Option<GameSnapshot>,
}

impl MoveResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), san: None, snapshot: None }
    }
}

struct Registries {
    games: HashMap<Uuid, Arc<GameSession>>,
    player_to_game: HashMap<Uuid, Uuid>,
    game_id_to_db_id: HashMap<Uuid, Uuid>,
}

pub struct GameManager {
    registries: RwLock<Registries>,
    player_store: Arc<dyn PlayerStore>,
    game_store: Arc<dyn GameStore>,
    persistence_enabled: bool,
    rating: RatingConfig,
    events: mpsc::UnboundedSender<GameEvent>,
}

impl GameManager {
    pub fn new(player_store: Arc<dyn PlayerStore>, game_store: Arc<dyn GameStore>, persistence_enabled: bool, rating: RatingConfig) -> (Self, mpsc::UnboundedReceiver<GameEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            registries: RwLock::new(Registries { games: HashMap::new(), player_to_game: HashMap::new(), game_id_to_db_id: HashMap::new() }),
            player_store,
            game_store,
            persistence_enabled,
            rating,
            events: tx,
        };
        (manager, rx)
    }

    /// Atomically inserts a new session into all three registries, rejecting
    /// if either player is already mapped to a game (`spec.md` §4.3).
    pub async fn create_game(&self, white: PlayerSnapshot, black: PlayerSnapshot, initial_time_ms: i64, increment_ms: i64, time_control: String, now_ms: i64) -> Result<Arc<GameSession>, SessionError> {
        let mut reg = self.registries.write().await;
        if reg.player_to_game.contains_key(&white.id) || reg.player_to_game.contains_key(&black.id) {
            return Err(SessionError::NotAParticipant);
        }

        let game_id = Uuid::new_v4();
        let session = Arc::new(GameSession::new(game_id, white.clone(), black.clone(), initial_time_ms, increment_ms, time_control.clone()));
        session.start(now_ms).await;

        if self.persistence_enabled {
            if let Ok(db_id) = self
                .game_store
                .create(white.id, black.id, &time_control, initial_time_ms, increment_ms, white.rating, black.rating)
                .await
            {
                reg.game_id_to_db_id.insert(game_id, db_id);
            }
        }

        reg.games.insert(game_id, session.clone());
        reg.player_to_game.insert(white.id, game_id);
        reg.player_to_game.insert(black.id, game_id);
        drop(reg);

        let snapshot = session.snapshot().await;
        let _ = self.events.send(GameEvent::GameStarted { game_id, white: white.id, black: black.id, snapshot });

        Ok(session)
    }

    pub async fn session_for(&self, game_id: Uuid) -> Option<Arc<GameSession>> {
        self.registries.read().await.games.get(&game_id).cloned()
    }

    /// The game a player currently has open, if any (`spec.md` §4.3's
    /// `playerToGame` registry, exposed for the connection layer to route
    /// disconnects and draw offers without keeping its own copy of the
    /// mapping).
    pub async fn game_id_for_player(&self, player_id: Uuid) -> Option<Uuid> {
        self.registries.read().await.player_to_game.get(&player_id).copied()
    }

    /// Validates and applies a move. Pre-empts with a timeout if the
    /// mover's clock had already run out by wall-clock time before the
    /// validator even runs (`spec.md` §4.3: "pre-empts if `remaining -
    /// elapsed <= 0`").
    pub async fn process_move(&self, game_id: Uuid, player_id: Uuid, from_alg: &str, to_alg: &str, promotion: Option<char>, _expected_sequence: u64, now_ms: i64) -> MoveResponse {
        let Some(session) = self.session_for(game_id).await else {
            return MoveResponse::failure("no such game");
        };
        if session.status().await != GameStatus::InProgress {
            return MoveResponse::failure("game is not in progress");
        }

        let mover_color = if session.white.id == player_id {
            Color::White
        } else if session.black.id == player_id {
            Color::Black
        } else {
            return MoveResponse::failure("player is not part of this game");
        };

        let (board, turn, castling, en_passant, last_move_at, remaining) = session.board_state().await;
        if turn != mover_color {
            return MoveResponse::failure("it is not that player's turn");
        }

        let elapsed = last_move_at.map(|t| (now_ms - t).max(0)).unwrap_or(0);
        if remaining - elapsed <= 0 {
            self.handle_timeout(game_id).await;
            return MoveResponse::failure("game is not in progress");
        }

        let (Some(from), Some(to)) = (Position::from_algebraic(from_alg), Position::from_algebraic(to_alg)) else {
            return MoveResponse::failure("invalid algebraic square");
        };
        let promotion_kind = match promotion {
            Some(c) => match crate::chess::PieceKind::from_promotion_letter(c) {
                Some(k) => Some(k),
                None => return MoveResponse::failure("invalid promotion piece"),
            },
            None => None,
        };

        let (mv, board_after) = match validate_move(&board, from, to, promotion_kind, mover_color, &castling, en_passant, now_ms, None) {
            Ok(v) => v,
            Err(e) => return MoveResponse::failure(e.to_string()),
        };

        let snapshot = match session.apply_validated_move(mv.clone(), board_after, elapsed, now_ms).await {
            Ok(s) => s,
            Err(e) => return MoveResponse::failure(e.to_string()),
        };

        if self.persistence_enabled {
            if let Some(db_id) = self.registries.read().await.game_id_to_db_id.get(&game_id).copied() {
                let history = session.move_history().await;
                if let Some(last) = history.last() {
                    let _ = self
                        .game_store
                        .record_move(
                            db_id,
                            snapshot.move_count as u32,
                            mover_color,
                            &mv.from.to_algebraic(),
                            &mv.to.to_algebraic(),
                            mv.promotion_type.and_then(crate::chess::PieceKind::promotion_letter),
                            Some(&last.san),
                            &last.fen_after,
                            Some(match mover_color {
                                Color::White => snapshot.white_time_ms,
                                Color::Black => snapshot.black_time_ms,
                            }),
                            Some(elapsed),
                        )
                        .await;
                }
            }
        }

        let san = session.move_history().await.last().map(|h| h.san.clone());
        let _ = self.events.send(GameEvent::MoveApplied {
            game_id,
            white: session.white.id,
            black: session.black.id,
            san: san.clone().unwrap_or_default(),
            snapshot: snapshot.clone(),
        });

        if is_terminal(snapshot.status) {
            self.run_end_of_game_pipeline(game_id, &session, snapshot.clone()).await;
        }

        MoveResponse { success: true, error: None, san, snapshot: Some(snapshot) }
    }

    pub async fn handle_resignation(&self, game_id: Uuid, player_id: Uuid) {
        let Some(session) = self.session_for(game_id).await else { return };
        let color = if session.white.id == player_id { Color::White } else { Color::Black };
        if let Ok(snapshot) = session.resign(color).await {
            self.run_end_of_game_pipeline(game_id, &session, snapshot).await;
        }
    }

    pub async fn handle_offer_draw(&self, game_id: Uuid, player_id: Uuid) -> Result<(), SessionError> {
        let Some(session) = self.session_for(game_id).await else { return Err(SessionError::GameNotInProgress) };
        let color = if session.white.id == player_id { Color::White } else { Color::Black };
        session.offer_draw(color).await?;
        let _ = self.events.send(GameEvent::DrawOffered { game_id, white: session.white.id, black: session.black.id, offered_by: color });
        Ok(())
    }

    pub async fn handle_draw_accepted(&self, game_id: Uuid) {
        let Some(session) = self.session_for(game_id).await else { return };
        if let Ok(snapshot) = session.accept_draw().await {
            self.run_end_of_game_pipeline(game_id, &session, snapshot).await;
        }
    }

    pub async fn handle_draw_declined(&self, game_id: Uuid) {
        let Some(session) = self.session_for(game_id).await else { return };
        let _ = session.decline_draw().await;
    }

    pub async fn handle_disconnection(&self, game_id: Uuid, player_id: Uuid) {
        let Some(session) = self.session_for(game_id).await else { return };
        let color = if session.white.id == player_id { Color::White } else { Color::Black };
        if let Ok(snapshot) = session.disconnect(color).await {
            self.run_end_of_game_pipeline(game_id, &session, snapshot).await;
        }
    }

    pub async fn handle_timeout(&self, game_id: Uuid) {
        let Some(session) = self.session_for(game_id).await else { return };
        let (_, turn, ..) = session.board_state().await;
        if let Ok(snapshot) = session.timeout_of(turn).await {
            self.run_end_of_game_pipeline(game_id, &session, snapshot).await;
        }
    }

    /// Elo, persistence, registry cleanup, notification — in that order, per
    /// `spec.md` §4.3.1.
    async fn run_end_of_game_pipeline(&self, game_id: Uuid, session: &Arc<GameSession>, snapshot: GameSnapshot) {
        let white_score = match snapshot.status {
            GameStatus::WhiteWon => elo::Score::Win,
            GameStatus::BlackWon => elo::Score::Loss,
            GameStatus::Draw => elo::Score::Draw,
            _ => elo::Score::Draw,
        };
        let (white_delta, black_delta) = elo::game_deltas(session.white.rating, session.black.rating, white_score, self.rating.k_factor, self.rating.min_rating, self.rating.max_rating);

        let _ = self.player_store.update_rating(session.white.id, session.white.rating + white_delta).await;
        let _ = self.player_store.update_rating(session.black.id, session.black.rating + black_delta).await;
        let white_result = match white_score {
            elo::Score::Win => MatchResult::Win,
            elo::Score::Loss => MatchResult::Loss,
            elo::Score::Draw => MatchResult::Draw,
        };
        let black_result = match white_score {
            elo::Score::Win => MatchResult::Loss,
            elo::Score::Loss => MatchResult::Win,
            elo::Score::Draw => MatchResult::Draw,
        };
        let _ = self.player_store.update_game_stats(session.white.id, white_result).await;
        let _ = self.player_store.update_game_stats(session.black.id, black_result).await;

        if self.persistence_enabled {
            if let Some(db_id) = self.registries.read().await.game_id_to_db_id.get(&game_id).copied() {
                let pgn = session.to_pgn(None).await;
                let result = match snapshot.status {
                    GameStatus::WhiteWon => GameResult::WhiteWin,
                    GameStatus::BlackWon => GameResult::BlackWin,
                    _ => GameResult::Draw,
                };
                let reason = snapshot.end_reason.map(end_reason_label).unwrap_or("unknown");
                let _ = self.game_store.complete(db_id, result, reason, &pgn, &snapshot.fen, white_delta, black_delta).await;
            }
        }

        let white_id = session.white.id;
        let black_id = session.black.id;

        let mut reg = self.registries.write().await;
        reg.games.remove(&game_id);
        reg.player_to_game.remove(&white_id);
        reg.player_to_game.remove(&black_id);
        reg.game_id_to_db_id.remove(&game_id);
        drop(reg);

        let _ = self.events.send(GameEvent::GameEnded { game_id, white: white_id, black: black_id, snapshot, white_rating_delta: white_delta, black_rating_delta: black_delta });
    }

    /// Every `InProgress` session whose side-to-move's clock has run out.
    /// The caller (the 1 s sweep task) fires `handle_timeout` for each.
    pub async fn sweep_expired_clocks(&self, now_ms: i64) -> Vec<Uuid> {
        let snapshot_games: Vec<(Uuid, Arc<GameSession>)> = self.registries.read().await.games.iter().map(|(id, s)| (*id, s.clone())).collect();
        let mut expired = Vec::new();
        for (id, session) in snapshot_games {
            if session.status().await != GameStatus::InProgress {
                continue;
            }
            let (_, _, _, _, last_move_at, remaining) = session.board_state().await;
            let Some(last_move_at) = last_move_at else { continue };
            let elapsed = (now_ms - last_move_at).max(0);
            if remaining - elapsed <= 0 {
                expired.push(id);
            }
        }
        expired
    }

    pub fn player_store(&self) -> &Arc<dyn PlayerStore> {
        &self.player_store
    }
}

fn is_terminal(status: GameStatus) -> bool {
    matches!(status, GameStatus::WhiteWon | GameStatus::BlackWon | GameStatus::Draw | GameStatus::Aborted)
}

fn end_reason_label(reason: GameEndReason) -> &'static str {
    match reason {
        GameEndReason::Checkmate => "checkmate",
        GameEndReason::Stalemate => "stalemate",
        GameEndReason::InsufficientMaterial => "insufficient_material",
        GameEndReason::FiftyMoveRule => "fifty_move_rule",
        GameEndReason::ThreefoldRepetition => "threefold_repetition",
        GameEndReason::Resignation => "resignation",
        GameEndReason::Agreement => "agreement",
        GameEndReason::Timeout => "timeout",
        GameEndReason::Disconnection => "disconnection",
        GameEndReason::Aborted => "aborted",
    }
}

/// Spawns the 1 s timeout-monitor sweep (`spec.md` §4.3.2). Exits when
/// `shutdown` fires.
pub fn spawn_timeout_monitor(manager: Arc<GameManager>, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let expired = manager.sweep_expired_clocks(now_ms).await;
                    for game_id in expired {
                        manager.handle_timeout(game_id).await;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryGameStore, InMemoryPlayerStore};

    fn rating_config() -> RatingConfig {
        RatingConfig { default_rating: 1200, k_factor: 32, min_rating: 100, max_rating: 3000 }
    }

    fn player(rating: i32) -> PlayerSnapshot {
        PlayerSnapshot { id: Uuid::new_v4(), username: "p".into(), rating }
    }

    #[tokio::test]
    async fn create_game_rejects_a_player_already_in_a_game() {
        let (manager, _rx) = GameManager::new(Arc::new(InMemoryPlayerStore::new()), Arc::new(InMemoryGameStore::new()), false, rating_config());
        let white = player(1200);
        let black = player(1200);
        manager.create_game(white.clone(), black.clone(), 300_000, 0, "blitz".into(), 0).await.unwrap();
        let err = manager.create_game(white, player(1200), 300_000, 0, "blitz".into(), 0).await.unwrap_err();
        assert_eq!(err, SessionError::NotAParticipant);
    }

    #[tokio::test]
    async fn flag_fall_ends_game_as_timeout() {
        let (manager, _rx) = GameManager::new(Arc::new(InMemoryPlayerStore::new()), Arc::new(InMemoryGameStore::new()), false, rating_config());
        let white = player(1200);
        let black = player(1200);
        let session = manager.create_game(white, black, 1_000, 0, "bullet".into(), 0).await.unwrap();
        let game_id = session.game_id;

        let expired = manager.sweep_expired_clocks(2_000).await;
        assert_eq!(expired, vec![game_id]);
        manager.handle_timeout(game_id).await;

        assert!(manager.session_for(game_id).await.is_none());
    }
}
