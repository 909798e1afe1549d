//! In-memory DAO implementations: concurrent `HashMap`s behind
//! `tokio::sync::RwLock`, the same shape as the teacher's
//! `HashMap<Uuid, Game>` registry (`game.rs`'s `GameManager`) generalized to
//! the player/session/game records this spec adds. The shipped default per
//! `spec.md` §6 — a durable backend is an operator-supplied trait object.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::chess::Color;
use crate::error::StoreError;
use crate::storage::{
    GameRecord, GameResult, GameStore, LeaderboardEntry, MatchResult, PlayerRecord, PlayerStore, SessionRecord, SessionStore, StoredMove,
};

#[derive(Default)]
pub struct InMemoryPlayerStore {
    by_id: RwLock<HashMap<Uuid, PlayerRecord>>,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerStore for InMemoryPlayerStore {
    async fn create(&self, username: &str, email: &str, password_hash: &str, default_rating: i32) -> Result<PlayerRecord, StoreError> {
        let mut map = self.by_id.write().await;
        if map.values().any(|p| p.username.eq_ignore_ascii_case(username)) {
            return Err(StoreError::UsernameTaken);
        }
        if map.values().any(|p| p.email.eq_ignore_ascii_case(email)) {
            return Err(StoreError::EmailTaken);
        }
        let record = PlayerRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            rating: default_rating,
            games_played: 0,
            games_won: 0,
            games_lost: 0,
            games_drawn: 0,
            created_at: Utc::now(),
            last_login_at: None,
            banned: false,
            ban_reason: None,
        };
        map.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<PlayerRecord, StoreError> {
        self.by_id.read().await.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_username(&self, username: &str) -> Result<PlayerRecord, StoreError> {
        self.by_id
            .read()
            .await
            .values()
            .find(|p| p.username.eq_ignore_ascii_case(username))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<PlayerRecord, StoreError> {
        self.by_id
            .read()
            .await
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), StoreError> {
        let mut map = self.by_id.write().await;
        let p = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        p.last_login_at = Some(Utc::now());
        Ok(())
    }

    async fn update_game_stats(&self, id: Uuid, result: MatchResult) -> Result<(), StoreError> {
        let mut map = self.by_id.write().await;
        let p = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        p.games_played += 1;
        match result {
            MatchResult::Win => p.games_won += 1,
            MatchResult::Loss => p.games_lost += 1,
            MatchResult::Draw => p.games_drawn += 1,
        }
        Ok(())
    }

    async fn update_rating(&self, id: Uuid, rating: i32) -> Result<(), StoreError> {
        let mut map = self.by_id.write().await;
        let p = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        p.rating = rating;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut map = self.by_id.write().await;
        let p = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        p.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn set_banned(&self, id: Uuid, banned: bool, reason: Option<String>) -> Result<(), StoreError> {
        let mut map = self.by_id.write().await;
        let p = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        p.banned = banned;
        p.ban_reason = reason;
        Ok(())
    }

    async fn is_username_available(&self, username: &str) -> Result<bool, StoreError> {
        Ok(!self.by_id.read().await.values().any(|p| p.username.eq_ignore_ascii_case(username)))
    }

    async fn is_email_available(&self, email: &str) -> Result<bool, StoreError> {
        Ok(!self.by_id.read().await.values().any(|p| p.email.eq_ignore_ascii_case(email)))
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let mut entries: Vec<LeaderboardEntry> = self
            .by_id
            .read()
            .await
            .values()
            .map(|p| LeaderboardEntry { player_id: p.id, username: p.username.clone(), rating: p.rating })
            .collect();
        entries.sort_by(|a, b| b.rating.cmp(&a.rating));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn rank(&self, player_id: Uuid) -> Result<u64, StoreError> {
        let map = self.by_id.read().await;
        let target = map.get(&player_id).ok_or(StoreError::NotFound)?;
        let higher = map.values().filter(|p| p.rating > target.rating).count();
        Ok(higher as u64 + 1)
    }

    async fn total_count(&self) -> Result<u64, StoreError> {
        Ok(self.by_id.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, player_id: Uuid, token_hash: &str, expires_at: DateTime<Utc>, origin: Option<String>) -> Result<SessionRecord, StoreError> {
        let record = SessionRecord {
            session_id: Uuid::new_v4(),
            player_id,
            token_hash: token_hash.to_string(),
            created_at: Utc::now(),
            expires_at,
            last_activity_at: Utc::now(),
            origin,
            revoked: false,
            revoked_reason: None,
        };
        self.sessions.write().await.insert(record.session_id, record.clone());
        Ok(record)
    }

    async fn get_by_token_hash(&self, token_hash: &str) -> Result<SessionRecord, StoreError> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_activity(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut map = self.sessions.write().await;
        let s = map.get_mut(&session_id).ok_or(StoreError::NotFound)?;
        s.last_activity_at = Utc::now();
        Ok(())
    }

    async fn revoke(&self, session_id: Uuid, reason: &str) -> Result<(), StoreError> {
        let mut map = self.sessions.write().await;
        let s = map.get_mut(&session_id).ok_or(StoreError::NotFound)?;
        s.revoked = true;
        s.revoked_reason = Some(reason.to_string());
        Ok(())
    }

    async fn revoke_all(&self, player_id: Uuid) -> Result<(), StoreError> {
        let mut map = self.sessions.write().await;
        for s in map.values_mut().filter(|s| s.player_id == player_id) {
            s.revoked = true;
            s.revoked_reason = Some("revoke_all".to_string());
        }
        Ok(())
    }

    async fn active_count_for(&self, player_id: Uuid) -> Result<u32, StoreError> {
        let now = Utc::now();
        let map = self.sessions.read().await;
        Ok(map.values().filter(|s| s.player_id == player_id && !s.revoked && s.expires_at > now).count() as u32)
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut map = self.sessions.write().await;
        let before = map.len();
        map.retain(|_, s| s.expires_at > now && !s.revoked);
        Ok((before - map.len()) as u64)
    }
}

struct StoredGame {
    record: GameRecord,
    moves: Vec<StoredMove>,
}

#[derive(Default)]
pub struct InMemoryGameStore {
    games: RwLock<HashMap<Uuid, StoredGame>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn create(
        &self,
        white: Uuid,
        black: Uuid,
        time_control: &str,
        initial_time_ms: i64,
        increment_ms: i64,
        white_rating: i32,
        black_rating: i32,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let record = GameRecord {
            id,
            white_id: white,
            black_id: black,
            time_control: time_control.to_string(),
            initial_time_ms,
            increment_ms,
            white_rating,
            black_rating,
            result: None,
            end_reason: None,
            pgn: None,
            final_fen: None,
            white_rating_delta: None,
            black_rating_delta: None,
        };
        self.games.write().await.insert(id, StoredGame { record, moves: Vec::new() });
        Ok(id)
    }

    async fn complete(&self, id: Uuid, result: GameResult, reason: &str, pgn: &str, final_fen: &str, white_delta: i32, black_delta: i32) -> Result<(), StoreError> {
        let mut map = self.games.write().await;
        let g = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        g.record.result = Some(result);
        g.record.end_reason = Some(reason.to_string());
        g.record.pgn = Some(pgn.to_string());
        g.record.final_fen = Some(final_fen.to_string());
        g.record.white_rating_delta = Some(white_delta);
        g.record.black_rating_delta = Some(black_delta);
        Ok(())
    }

    async fn abort(&self, id: Uuid) -> Result<(), StoreError> {
        let mut map = self.games.write().await;
        let g = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        g.record.end_reason = Some("aborted".to_string());
        Ok(())
    }

    async fn record_move(
        &self,
        id: Uuid,
        move_number: u32,
        color: Color,
        from: &str,
        to: &str,
        promotion: Option<char>,
        san: Option<&str>,
        fen_after: &str,
        time_remaining_ms: Option<i64>,
        move_time_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut map = self.games.write().await;
        let g = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        g.moves.push(StoredMove {
            move_number,
            color,
            from: from.to_string(),
            to: to.to_string(),
            promotion,
            san: san.map(str::to_string),
            fen_after: fen_after.to_string(),
            time_remaining_ms,
            move_time_ms,
        });
        Ok(())
    }

    async fn list_by_player(&self, player_id: Uuid, limit: usize, offset: usize) -> Result<Vec<GameRecord>, StoreError> {
        let map = self.games.read().await;
        let mut records: Vec<GameRecord> = map
            .values()
            .filter(|g| g.record.white_id == player_id || g.record.black_id == player_id)
            .map(|g| g.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_moves(&self, id: Uuid) -> Result<Vec<StoredMove>, StoreError> {
        let map = self.games.read().await;
        let g = map.get(&id).ok_or(StoreError::NotFound)?;
        Ok(g.moves.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = InMemoryPlayerStore::new();
        store.create("alice", "alice@example.com", "hash", 1200).await.unwrap();
        let err = store.create("Alice", "other@example.com", "hash", 1200).await.unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken));
    }

    #[tokio::test]
    async fn leaderboard_is_sorted_descending() {
        let store = InMemoryPlayerStore::new();
        store.create("low", "low@example.com", "hash", 1000).await.unwrap();
        store.create("high", "high@example.com", "hash", 1800).await.unwrap();
        let board = store.leaderboard(10).await.unwrap();
        assert_eq!(board[0].username, "high");
    }

    #[tokio::test]
    async fn revoked_session_is_not_counted_active() {
        let store = InMemorySessionStore::new();
        let record = store.create(Uuid::new_v4(), "hash", Utc::now() + chrono::Duration::hours(1), None).await.unwrap();
        assert_eq!(store.active_count_for(record.player_id).await.unwrap(), 1);
        store.revoke(record.session_id, "logout").await.unwrap();
        assert_eq!(store.active_count_for(record.player_id).await.unwrap(), 0);
    }
}
