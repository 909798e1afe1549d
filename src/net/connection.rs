//! Per-connection state: the outbound frame channel, the rolling
//! rate-limit counter, and the bits the hub needs to enforce single-session
//! login and idle-connection eviction (`spec.md` §4.5).

use std::collections::VecDeque;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::protocol;

/// A 60 s rolling window of message timestamps, trimmed on every check.
/// `spec.md` §4.5: "a rolling counter of incoming messages over 60 s".
struct RateWindow {
    timestamps_ms: VecDeque<i64>,
}

impl RateWindow {
    fn new() -> Self {
        Self { timestamps_ms: VecDeque::new() }
    }

    /// Records one message at `now_ms` and reports whether the connection
    /// is still under `limit_per_minute`.
    fn record(&mut self, now_ms: i64, limit_per_minute: u32) -> bool {
        while let Some(&front) = self.timestamps_ms.front() {
            if now_ms - front > 60_000 {
                self.timestamps_ms.pop_front();
            } else {
                break;
            }
        }
        self.timestamps_ms.push_back(now_ms);
        self.timestamps_ms.len() as u32 <= limit_per_minute
    }
}

struct MutableState {
    player_id: Option<Uuid>,
    username: Option<String>,
    game_id: Option<Uuid>,
    last_activity_ms: i64,
    rate: RateWindow,
    /// Set at login; lets the hub's "full" check (`spec.md` §5) look the
    /// session back up in `SessionStore` by its digest to catch revocation.
    session_id: Option<Uuid>,
    token_hash: Option<String>,
    /// The signed quick-check token issued at login, re-verified locally on
    /// the hot move path without a `SessionStore` round trip.
    quick_token: Option<String>,
}

/// One live TCP connection. Reads mutate this directly (they are
/// sequential for a given connection, per `spec.md` §4.5's per-connection
/// ordering invariant); writes go through `outbound`, whose single
/// receiving task is the sole writer to the socket, serializing frames.
pub struct Connection {
    pub id: Uuid,
    pub outbound: mpsc::UnboundedSender<String>,
    state: Mutex<MutableState>,
}

impl Connection {
    pub fn new(outbound: mpsc::UnboundedSender<String>, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            state: Mutex::new(MutableState {
                player_id: None,
                username: None,
                game_id: None,
                last_activity_ms: now_ms,
                rate: RateWindow::new(),
                session_id: None,
                token_hash: None,
                quick_token: None,
            }),
        }
    }

    /// Enqueues a frame for this connection's writer task. A closed
    /// outbound channel (writer already gone) is silently ignored — the
    /// hub will observe the disconnect through the read loop.
    pub fn send_frame(&self, frame: String) {
        let _ = self.outbound.send(frame);
    }

    pub fn send_payload<T: serde::Serialize>(&self, type_code: i64, payload: &T) {
        let frame = protocol::encode(type_code, &protocol::new_message_id(), chrono::Utc::now().timestamp_millis(), payload);
        self.send_frame(frame);
    }

    pub async fn touch(&self, now_ms: i64) {
        self.state.lock().await.last_activity_ms = now_ms;
    }

    pub async fn last_activity_ms(&self) -> i64 {
        self.state.lock().await.last_activity_ms
    }

    /// Updates `lastActivity` and reports whether this message is within
    /// the rate limit (`spec.md` §4.5).
    pub async fn record_message(&self, now_ms: i64, limit_per_minute: u32) -> bool {
        let mut state = self.state.lock().await;
        state.last_activity_ms = now_ms;
        state.rate.record(now_ms, limit_per_minute)
    }

    pub async fn authenticate(&self, player_id: Uuid, username: String, session_id: Uuid, token_hash: String, quick_token: String) {
        let mut state = self.state.lock().await;
        state.player_id = Some(player_id);
        state.username = Some(username);
        state.session_id = Some(session_id);
        state.token_hash = Some(token_hash);
        state.quick_token = Some(quick_token);
    }

    pub async fn player_id(&self) -> Option<Uuid> {
        self.state.lock().await.player_id
    }

    pub async fn username(&self) -> Option<String> {
        self.state.lock().await.username.clone()
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        self.state.lock().await.session_id
    }

    pub async fn token_hash(&self) -> Option<String> {
        self.state.lock().await.token_hash.clone()
    }

    pub async fn quick_token(&self) -> Option<String> {
        self.state.lock().await.quick_token.clone()
    }

    pub async fn set_game(&self, game_id: Option<Uuid>) {
        self.state.lock().await.game_id = game_id;
    }

    pub async fn game_id(&self) -> Option<Uuid> {
        self.state.lock().await.game_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_window_rejects_once_the_limit_is_exceeded() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx, 0);
        for i in 0..5 {
            assert!(conn.record_message(i, 5).await);
        }
        assert!(!conn.record_message(5, 5).await);
    }

    #[tokio::test]
    async fn rate_window_forgives_messages_older_than_sixty_seconds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx, 0);
        for i in 0..5 {
            assert!(conn.record_message(i, 5).await);
        }
        assert!(conn.record_message(61_000, 5).await);
    }

    #[tokio::test]
    async fn authenticate_sets_player_identity() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx, 0);
        assert_eq!(conn.player_id().await, None);
        let pid = Uuid::new_v4();
        conn.authenticate(pid, "alice".into(), Uuid::new_v4(), "hash".into(), "token".into()).await;
        assert_eq!(conn.player_id().await, Some(pid));
        assert_eq!(conn.username().await.as_deref(), Some("alice"));
    }
}
