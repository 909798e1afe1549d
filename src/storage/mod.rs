//! The DAO surface the core consumes, plus an in-memory implementation.
//!
//! `spec.md` §1 places "SQL schema mechanics beyond the DAO interface" out of
//! scope; this module defines the traits the core calls and ships only the
//! in-memory backend (`spec.md` §6: "operators may provide these as a
//! durable (SQL) backend or an in-memory implementation; the core behavior
//! must be identical"). Grounded in `checkai`'s `HashMap<Uuid, Game>`
//! registry style (`game.rs`'s `GameManager`), generalized to
//! `tokio::sync::RwLock`-guarded maps behind `async_trait`s.

pub mod auth;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Win,
    Draw,
    Loss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
}

/// Persistent attributes of a registered player (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub rating: i32,
    pub games_played: u32,
    pub games_won: u32,
    pub games_lost: u32,
    pub games_drawn: u32,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub banned: bool,
    pub ban_reason: Option<String>,
}

/// Persistent attributes of a login session (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub player_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub origin: Option<String>,
    pub revoked: bool,
    pub revoked_reason: Option<String>,
}

/// A leaderboard row as returned by `PlayerStore::leaderboard`.
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub player_id: Uuid,
    pub username: String,
    pub rating: i32,
}

/// One recorded ply as returned by `GameStore::listMoves`.
#[derive(Debug, Clone)]
pub struct StoredMove {
    pub move_number: u32,
    pub color: crate::chess::Color,
    pub from: String,
    pub to: String,
    pub promotion: Option<char>,
    pub san: Option<String>,
    pub fen_after: String,
    pub time_remaining_ms: Option<i64>,
    pub move_time_ms: Option<i64>,
}

/// A completed-or-in-progress game row as returned by `listByPlayer`.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub id: Uuid,
    pub white_id: Uuid,
    pub black_id: Uuid,
    pub time_control: String,
    pub initial_time_ms: i64,
    pub increment_ms: i64,
    pub white_rating: i32,
    pub black_rating: i32,
    pub result: Option<GameResult>,
    pub end_reason: Option<String>,
    pub pgn: Option<String>,
    pub final_fen: Option<String>,
    pub white_rating_delta: Option<i32>,
    pub black_rating_delta: Option<i32>,
}

/// Credential storage, rating, and statistics (`spec.md` §6).
#[async_trait]
pub trait PlayerStore: Send + Sync {
    async fn create(&self, username: &str, email: &str, password_hash: &str, default_rating: i32) -> Result<PlayerRecord, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<PlayerRecord, StoreError>;
    async fn get_by_username(&self, username: &str) -> Result<PlayerRecord, StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<PlayerRecord, StoreError>;
    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError>;
    async fn update_game_stats(&self, id: Uuid, result: MatchResult) -> Result<(), StoreError>;
    async fn update_rating(&self, id: Uuid, rating: i32) -> Result<(), StoreError>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
    async fn set_banned(&self, id: Uuid, banned: bool, reason: Option<String>) -> Result<(), StoreError>;
    async fn is_username_available(&self, username: &str) -> Result<bool, StoreError>;
    async fn is_email_available(&self, email: &str) -> Result<bool, StoreError>;
    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError>;
    async fn rank(&self, player_id: Uuid) -> Result<u64, StoreError>;
    async fn total_count(&self) -> Result<u64, StoreError>;
}

/// Token→session record lifecycle with revocation and expiry (`spec.md` §6).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, player_id: Uuid, token_hash: &str, expires_at: DateTime<Utc>, origin: Option<String>) -> Result<SessionRecord, StoreError>;
    async fn get_by_token_hash(&self, token_hash: &str) -> Result<SessionRecord, StoreError>;
    async fn update_activity(&self, session_id: Uuid) -> Result<(), StoreError>;
    async fn revoke(&self, session_id: Uuid, reason: &str) -> Result<(), StoreError>;
    async fn revoke_all(&self, player_id: Uuid) -> Result<(), StoreError>;
    async fn active_count_for(&self, player_id: Uuid) -> Result<u32, StoreError>;
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

/// Persisted game records and their moves (`spec.md` §6).
#[async_trait]
pub trait GameStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        white: Uuid,
        black: Uuid,
        time_control: &str,
        initial_time_ms: i64,
        increment_ms: i64,
        white_rating: i32,
        black_rating: i32,
    ) -> Result<Uuid, StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        id: Uuid,
        result: GameResult,
        reason: &str,
        pgn: &str,
        final_fen: &str,
        white_delta: i32,
        black_delta: i32,
    ) -> Result<(), StoreError>;

    async fn abort(&self, id: Uuid) -> Result<(), StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn record_move(
        &self,
        id: Uuid,
        move_number: u32,
        color: crate::chess::Color,
        from: &str,
        to: &str,
        promotion: Option<char>,
        san: Option<&str>,
        fen_after: &str,
        time_remaining_ms: Option<i64>,
        move_time_ms: Option<i64>,
    ) -> Result<(), StoreError>;

    async fn list_by_player(&self, player_id: Uuid, limit: usize, offset: usize) -> Result<Vec<GameRecord>, StoreError>;
    async fn list_moves(&self, id: Uuid) -> Result<Vec<StoredMove>, StoreError>;
}
