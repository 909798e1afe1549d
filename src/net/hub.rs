//! The `ConnectionHub`: binds the TCP port, accepts sockets, and dispatches
//! frames to the `GameManager` and `Matchmaker` (`spec.md` §4.5).
//!
//! Replaces the teacher's `ws.rs` (`actix-web` + `actix-web-actors`,
//! `GameBroadcaster`/`WsSession` actors exchanging `#[derive(Message)]`
//! mailbox types) with the architecture `spec.md` §9 calls for: a raw
//! `tokio::net::TcpListener` accept loop, one read task and one write task
//! per connection joined by an `mpsc` channel, and `GameEvent` routed to
//! connections by a dedicated relay task instead of an actor registry.
//! The per-connection dispatch table and JSON response/error shaping below
//! are grounded in `ws.rs`'s `handle_message`/`build_response`/
//! `build_error_response`, generalized from its string `action` field to
//! the numeric `type` codes in [`crate::net::protocol`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{SecurityConfig, ServerConfig};
use crate::manager::{GameEvent, GameManager};
use crate::matchmaking::Matchmaker;
use crate::session::{GameEndReason, GameSnapshot, GameStatus};
use crate::storage::auth::{self, QuickSessionVerifier};
use crate::storage::{PlayerStore, SessionStore};

use super::connection::Connection;
use super::protocol::{self, codes, ClientMessage, ErrorCode, ErrorPayload};

const WRITE_DEADLINE: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A connection plus a `Notify` the hub can fire to force its read loop to
/// exit (used by single-session replacement and shutdown).
struct Registered {
    conn: Arc<Connection>,
    close: Arc<Notify>,
}

pub struct ConnectionHub {
    connections: RwLock<HashMap<Uuid, Registered>>,
    by_player: RwLock<HashMap<Uuid, Uuid>>,
    manager: Arc<GameManager>,
    matchmaker: Arc<Matchmaker>,
    player_store: Arc<dyn PlayerStore>,
    session_store: Arc<dyn SessionStore>,
    verifier: QuickSessionVerifier,
    server: ServerConfig,
    security: SecurityConfig,
    in_memory: bool,
}

impl ConnectionHub {
    pub fn new(
        manager: Arc<GameManager>,
        matchmaker: Arc<Matchmaker>,
        player_store: Arc<dyn PlayerStore>,
        session_store: Arc<dyn SessionStore>,
        server: ServerConfig,
        security: SecurityConfig,
        in_memory: bool,
    ) -> Arc<Self> {
        let verifier = QuickSessionVerifier::new(security.token_secret.clone());
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            by_player: RwLock::new(HashMap::new()),
            manager,
            matchmaker,
            player_store,
            session_store,
            verifier,
            server,
            security,
            in_memory,
        })
    }

    /// Runs the accept loop until `shutdown` fires. One read task and one
    /// write task are spawned per accepted socket (`spec.md` §5's expected
    /// topology).
    pub fn spawn_accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown = shutdown;
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                log::debug!("accepted connection from {addr}");
                                let hub = self.clone();
                                let conn_shutdown = shutdown.resubscribe();
                                tokio::spawn(async move { hub.handle_socket(stream, conn_shutdown).await });
                            }
                            Err(e) => log::warn!("accept failed: {e}"),
                        }
                    }
                    _ = shutdown.recv() => {
                        log::info!("accept loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn handle_socket(self: Arc<Self>, stream: TcpStream, mut shutdown: broadcast::Receiver<()>) {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("failed to disable Nagle: {e}");
        }
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let conn = Arc::new(Connection::new(tx, now_ms()));
        let close = Arc::new(Notify::new());

        self.connections.write().await.insert(conn.id, Registered { conn: conn.clone(), close: close.clone() });

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let write = write_half.write_all(frame.as_bytes());
                if tokio::time::timeout(WRITE_DEADLINE, write).await.is_err() {
                    log::warn!("write deadline exceeded, closing connection");
                    break;
                }
            }
        });

        let mut reader = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                line = reader.next_line() => {
                    match line {
                        Ok(Some(text)) => self.handle_line(&conn, &text).await,
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("read error on connection {}: {e}", conn.id);
                            conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::Disconnected, "connection I/O error"));
                            break;
                        }
                    }
                }
                _ = close.notified() => break,
                _ = shutdown.recv() => break,
            }
        }

        self.on_connection_closed(&conn).await;
        drop(conn);
        writer.abort();
    }

    async fn handle_line(&self, conn: &Arc<Connection>, text: &str) {
        let now = now_ms();
        let within_limit = conn.record_message(now, self.server.max_requests_per_minute).await;
        if !within_limit {
            conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::RateLimited, "too many messages"));
            return;
        }

        match protocol::decode(text) {
            Ok((envelope, msg)) => self.dispatch(conn, envelope.message_id, msg).await,
            Err(crate::error::ProtocolError::UnknownType(t)) => {
                conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::UnknownMessage, format!("unrecognized type {t}")));
            }
            Err(e) => {
                conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::UnknownMessage, e.to_string()));
            }
        }
    }

    async fn dispatch(&self, conn: &Arc<Connection>, message_id: String, msg: ClientMessage) {
        match msg {
            ClientMessage::Connect => self.handle_connect(conn),
            ClientMessage::Heartbeat => self.handle_heartbeat(conn),
            ClientMessage::Login { username, password } => self.handle_login(conn, username, password).await,
            ClientMessage::Register { username, email, password } => self.handle_register(conn, username, email, password).await,
            ClientMessage::Logout => self.handle_logout(conn).await,
            ClientMessage::FindMatch { time_control, initial_time_ms, increment_ms } => {
                self.handle_find_match(conn, time_control, initial_time_ms, increment_ms).await
            }
            ClientMessage::CancelFindMatch => self.handle_cancel_find_match(conn).await,
            ClientMessage::MoveRequest { game_id, from, to, promotion, expected_sequence } => {
                self.handle_move_request(conn, message_id, game_id, from, to, promotion, expected_sequence).await
            }
            ClientMessage::Resign { game_id } => self.handle_resign(conn, game_id).await,
            ClientMessage::OfferDraw { game_id } => self.handle_offer_draw(conn, game_id).await,
            ClientMessage::AcceptDraw { game_id } => self.handle_accept_draw(conn, game_id).await,
            ClientMessage::DeclineDraw { game_id } => self.handle_decline_draw(conn, game_id).await,
        }
    }

    fn handle_connect(&self, conn: &Arc<Connection>) {
        conn.send_payload(codes::CONNECT_RESPONSE, &json!({ "serverId": "chessd", "inMemory": self.in_memory }));
    }

    fn handle_heartbeat(&self, conn: &Arc<Connection>) {
        conn.send_payload(codes::HEARTBEAT_ACK, &json!({ "serverTime": now_ms() }));
    }

    /// The hot-path check (`spec.md` §5): verifies the quick-check token's
    /// signature and expiry locally, without a `SessionStore` round trip.
    /// Used only for `MoveRequest` — everything else uses the full check.
    async fn require_login_quick(&self, conn: &Arc<Connection>) -> Option<(Uuid, String)> {
        let (Some(player_id), Some(token)) = (conn.player_id().await, conn.quick_token().await) else {
            conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::NotLoggedIn, "login required"));
            return None;
        };
        match self.verifier.quick_check(&token) {
            Ok((subject, _session_id)) if subject == player_id => Some((player_id, conn.username().await.unwrap_or_default())),
            _ => {
                conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::InvalidToken, "session token expired or invalid"));
                None
            }
        }
    }

    /// The full check (`spec.md` §5): consults `SessionStore` so a
    /// revoked-but-not-yet-expired session is rejected immediately, not just
    /// on its eventual expiry.
    async fn require_login_full(&self, conn: &Arc<Connection>) -> Option<(Uuid, String)> {
        let (Some(player_id), Some(session_id)) = (conn.player_id().await, conn.session_id().await) else {
            conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::NotLoggedIn, "login required"));
            return None;
        };
        let record = match self.session_store.get_by_token_hash(&conn.token_hash().await.unwrap_or_default()).await {
            Ok(r) => r,
            Err(_) => {
                conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::SessionError, "session not found"));
                return None;
            }
        };
        if record.revoked || record.expires_at <= chrono::Utc::now() {
            conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::SessionError, "session expired or revoked"));
            return None;
        }
        let _ = session_id;
        let _ = self.session_store.update_activity(record.session_id).await;
        Some((player_id, conn.username().await.unwrap_or_default()))
    }

    async fn handle_login(&self, conn: &Arc<Connection>, username: String, password: String) {
        let player = match self.player_store.get_by_username(&username).await {
            Ok(p) => p,
            Err(_) => {
                conn.send_payload(codes::LOGIN_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InvalidCredentials, "unknown username or password") }));
                return;
            }
        };
        if player.banned {
            conn.send_payload(codes::LOGIN_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::AccountBanned, player.ban_reason.unwrap_or_default()) }));
            return;
        }
        if !auth::verify_password(&password, &player.password_hash) {
            conn.send_payload(codes::LOGIN_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InvalidCredentials, "unknown username or password") }));
            return;
        }

        self.evict_other_sessions(player.id, conn.id).await;

        if let Ok(active) = self.session_store.active_count_for(player.id).await {
            if active >= self.security.max_sessions_per_player {
                let _ = self.session_store.revoke_all(player.id).await;
            }
        }

        let raw_token = auth::generate_session_token();
        let token_hash = auth::digest_token(&raw_token);
        let expires_at = auth::token_expiry(self.security.token_expiration_hours);
        let record = match self.session_store.create(player.id, &token_hash, expires_at, None).await {
            Ok(r) => r,
            Err(_) => {
                conn.send_payload(codes::LOGIN_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::DatabaseError, "could not create session") }));
                return;
            }
        };
        let _ = self.player_store.update_last_login(player.id).await;
        let quick_token = match self.verifier.issue(player.id, record.session_id, expires_at) {
            Ok(t) => t,
            Err(_) => {
                conn.send_payload(codes::LOGIN_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InternalError, "could not issue session token") }));
                return;
            }
        };

        conn.authenticate(player.id, player.username.clone(), record.session_id, token_hash, quick_token).await;
        self.by_player.write().await.insert(player.id, conn.id);

        conn.send_payload(
            codes::LOGIN_RESPONSE,
            &json!({ "success": true, "token": raw_token, "playerId": player.id, "username": player.username, "rating": player.rating }),
        );
    }

    async fn handle_register(&self, conn: &Arc<Connection>, username: String, email: String, password: String) {
        if username.trim().is_empty() || username.len() > 32 {
            conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InvalidUsername, "username must be 1-32 characters") }));
            return;
        }
        if !email.contains('@') {
            conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InvalidEmail, "not a valid email address") }));
            return;
        }
        match self.player_store.is_username_available(&username).await {
            Ok(true) => {}
            _ => {
                conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::UsernameTaken, "username already registered") }));
                return;
            }
        }
        match self.player_store.is_email_available(&email).await {
            Ok(true) => {}
            _ => {
                conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::EmailTaken, "email already registered") }));
                return;
            }
        }

        let hash = match auth::hash_password(&password) {
            Ok(h) => h,
            Err(_) => {
                conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::InternalError, "could not hash password") }));
                return;
            }
        };

        match self.player_store.create(&username, &email, &hash, 1200).await {
            Ok(record) => {
                conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": true, "playerId": record.id, "rating": record.rating }));
            }
            Err(e) => {
                conn.send_payload(codes::REGISTER_RESPONSE, &json!({ "success": false, "error": ErrorPayload::new(ErrorCode::DatabaseError, e.to_string()) }));
            }
        }
    }

    async fn handle_logout(&self, conn: &Arc<Connection>) {
        if let Some(player_id) = conn.player_id().await {
            let _ = self.session_store.revoke_all(player_id).await;
            self.by_player.write().await.remove(&player_id);
        }
    }

    async fn handle_find_match(&self, conn: &Arc<Connection>, time_control: String, initial_time_ms: i64, increment_ms: i64) {
        let Some((player_id, username)) = self.require_login_full(conn).await else { return };
        let rating = self.player_store.get_by_id(player_id).await.map(|p| p.rating).unwrap_or(1200);
        self.matchmaker.enqueue(player_id, username, rating, time_control, initial_time_ms, increment_ms, now_ms()).await;
        let position = self.matchmaker.position_of(player_id).await.unwrap_or(1);
        conn.send_payload(codes::QUEUE_STATUS, &json!({ "position": position }));
    }

    async fn handle_cancel_find_match(&self, conn: &Arc<Connection>) {
        let Some((player_id, _)) = self.require_login_full(conn).await else { return };
        self.matchmaker.cancel(player_id).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_move_request(&self, conn: &Arc<Connection>, message_id: String, game_id: Uuid, from: String, to: String, promotion: Option<char>, expected_sequence: u64) {
        let Some((player_id, _)) = self.require_login_quick(conn).await else { return };
        let response = self.manager.process_move(game_id, player_id, &from, &to, promotion, expected_sequence, now_ms()).await;

        conn.send_payload(
            codes::MOVE_RESPONSE,
            &json!({
                "success": response.success,
                "error": response.error,
                "san": response.san,
                "state": response.snapshot.as_ref().map(snapshot_json),
            }),
        );

        if response.success {
            if let Some(session) = self.manager.session_for(game_id).await {
                let opponent = if session.white.id == player_id { session.black.id } else { session.white.id };
                let notification = json!({
                    "gameId": game_id,
                    "from": from,
                    "to": to,
                    "san": response.san,
                    "state": response.snapshot.as_ref().map(snapshot_json),
                });
                self.send_to_player(opponent, codes::MOVE_NOTIFICATION, &notification).await;
            }
            if let Some(snapshot) = &response.snapshot {
                if is_terminal(snapshot.status) {
                    self.broadcast_game_end(game_id, snapshot).await;
                }
            }
        } else {
            let _ = message_id;
        }
    }

    async fn handle_resign(&self, conn: &Arc<Connection>, game_id: Uuid) {
        let Some((player_id, _)) = self.require_login_full(conn).await else { return };
        self.manager.handle_resignation(game_id, player_id).await;
    }

    async fn handle_offer_draw(&self, conn: &Arc<Connection>, game_id: Uuid) {
        let Some((player_id, _)) = self.require_login_full(conn).await else { return };
        if let Ok(()) = self.manager.handle_offer_draw(game_id, player_id).await {
            if let Some(session) = self.manager.session_for(game_id).await {
                let opponent = if session.white.id == player_id { session.black.id } else { session.white.id };
                self.send_to_player(opponent, codes::DRAW_OFFERED, &json!({ "gameId": game_id, "offeredBy": player_id })).await;
            }
        }
    }

    async fn handle_accept_draw(&self, conn: &Arc<Connection>, game_id: Uuid) {
        if self.require_login_full(conn).await.is_none() {
            return;
        }
        self.manager.handle_draw_accepted(game_id).await;
    }

    async fn handle_decline_draw(&self, conn: &Arc<Connection>, game_id: Uuid) {
        let Some((player_id, _)) = self.require_login_full(conn).await else { return };
        self.manager.handle_draw_declined(game_id).await;
        if let Some(session) = self.manager.session_for(game_id).await {
            let opponent = if session.white.id == player_id { session.black.id } else { session.white.id };
            self.send_to_player(opponent, codes::ERROR, &ErrorPayload::new(ErrorCode::DrawDeclined, "the draw offer was declined")).await;
        }
    }

    /// Every other live connection for `player_id` receives `SESSION_REPLACED`
    /// and is force-closed after a short flush delay (`spec.md` §4.5).
    async fn evict_other_sessions(&self, player_id: Uuid, new_connection_id: Uuid) {
        let previous = { self.by_player.read().await.get(&player_id).copied() };
        let Some(previous_id) = previous else { return };
        if previous_id == new_connection_id {
            return;
        }
        let registered = { self.connections.read().await.get(&previous_id).map(|r| (r.conn.clone(), r.close.clone())) };
        if let Some((old_conn, close)) = registered {
            old_conn.send_payload(codes::ERROR, &ErrorPayload::new(ErrorCode::SessionReplaced, "logged in from another connection"));
            let close = close.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                close.notify_one();
            });
        }
    }

    async fn send_to_player<T: serde::Serialize>(&self, player_id: Uuid, type_code: i64, payload: &T) {
        let connection_id = { self.by_player.read().await.get(&player_id).copied() };
        let Some(connection_id) = connection_id else { return };
        let conn = { self.connections.read().await.get(&connection_id).map(|r| r.conn.clone()) };
        if let Some(conn) = conn {
            conn.send_payload(type_code, payload);
        }
    }

    async fn broadcast_game_end(&self, game_id: Uuid, snapshot: &GameSnapshot) {
        let payload = json!({ "gameId": game_id, "state": snapshot_json(snapshot) });
        if let Some(session) = self.manager.session_for(game_id).await {
            self.send_to_player(session.white.id, codes::GAME_END, &payload).await;
            self.send_to_player(session.black.id, codes::GAME_END, &payload).await;
        }
    }

    async fn on_connection_closed(&self, conn: &Arc<Connection>) {
        self.connections.write().await.remove(&conn.id);
        let Some(player_id) = conn.player_id().await else { return };
        {
            let mut by_player = self.by_player.write().await;
            if by_player.get(&player_id) == Some(&conn.id) {
                by_player.remove(&player_id);
            }
        }
        self.matchmaker.cancel(player_id).await;

        let Some(game_id) = self.manager.game_id_for_player(player_id).await else { return };
        self.spawn_disconnect_grace(game_id, player_id);
    }

    /// `spec.md` §4.5.1: after `disconnectGracePeriod`, if no connection for
    /// `player_id` has reappeared, forfeit the game.
    fn spawn_disconnect_grace(self: &Arc<Self>, game_id: Uuid, player_id: Uuid) {
        let hub = self.clone();
        let grace = Duration::from_secs(self.server.disconnection_grace_period_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let reappeared = hub.by_player.read().await.contains_key(&player_id);
            if !reappeared {
                hub.manager.handle_disconnection(game_id, player_id).await;
            }
        });
    }

    /// Sweeps the matchmaker every second; on each pairing, creates the
    /// game and notifies both players (`spec.md` §4.4/§5).
    pub fn spawn_matchmaking_sweep(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let pairings = self.matchmaker.sweep(now_ms()).await;
                        for pairing in pairings {
                            self.start_matched_game(pairing).await;
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    async fn start_matched_game(&self, pairing: crate::matchmaking::Pairing) {
        use crate::session::PlayerSnapshot;
        let white = PlayerSnapshot { id: pairing.white.player_id, username: pairing.white.username.clone(), rating: pairing.white.rating };
        let black = PlayerSnapshot { id: pairing.black.player_id, username: pairing.black.username.clone(), rating: pairing.black.rating };
        let Ok(session) = self
            .manager
            .create_game(white, black, pairing.white.initial_time_ms, pairing.white.increment_ms, pairing.white.time_control.clone(), now_ms())
            .await
        else {
            return;
        };

        self.by_player_set_game(pairing.white.player_id, session.game_id).await;
        self.by_player_set_game(pairing.black.player_id, session.game_id).await;

        let snapshot = session.snapshot().await;
        let payload = json!({
            "gameId": session.game_id,
            "white": { "id": session.white.id, "username": session.white.username, "rating": session.white.rating },
            "black": { "id": session.black.id, "username": session.black.username, "rating": session.black.rating },
            "timeControl": session.time_control,
            "state": snapshot_json(&snapshot),
        });
        self.send_to_player(session.white.id, codes::GAME_START, &payload).await;
        self.send_to_player(session.black.id, codes::GAME_START, &payload).await;
    }

    async fn by_player_set_game(&self, player_id: Uuid, game_id: Uuid) {
        let connection_id = { self.by_player.read().await.get(&player_id).copied() };
        let Some(connection_id) = connection_id else { return };
        let conn = { self.connections.read().await.get(&connection_id).map(|r| r.conn.clone()) };
        if let Some(conn) = conn {
            conn.set_game(Some(game_id)).await;
        }
    }

    /// Closes every connection whose `lastActivity` exceeds
    /// `connectionTimeout` (`spec.md` §4.5).
    pub fn spawn_heartbeat_supervisor(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.server.heartbeat_interval_seconds.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = now_ms();
                        let timeout_ms = (self.server.connection_timeout_seconds as i64) * 1000;
                        let stale: Vec<Arc<Notify>> = {
                            let mut stale = Vec::new();
                            for registered in self.connections.read().await.values() {
                                if now - registered.conn.last_activity_ms().await > timeout_ms {
                                    stale.push(registered.close.clone());
                                }
                            }
                            stale
                        };
                        for close in stale {
                            close.notify_one();
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Relays `GameEvent`s the `GameManager` emits to the connected
    /// players they concern (`spec.md` §9's explicit listener, replacing
    /// the teacher's actor mailbox coupling).
    pub fn spawn_game_event_relay(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<GameEvent>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Some(GameEvent::GameEnded { game_id, white, black, snapshot, white_rating_delta, black_rating_delta }) => {
                                let payload = json!({
                                    "gameId": game_id,
                                    "state": snapshot_json(&snapshot),
                                    "whiteRatingDelta": white_rating_delta,
                                    "blackRatingDelta": black_rating_delta,
                                });
                                self.send_to_player(white, codes::GAME_END, &payload).await;
                                self.send_to_player(black, codes::GAME_END, &payload).await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Notifies every connected client and closes their sockets. Returns
    /// once all reader/writer tasks have had `SHUTDOWN_GRACE` to exit.
    pub async fn shutdown(&self) {
        let closers: Vec<Arc<Notify>> = self.connections.read().await.values().map(|r| r.close.clone()).collect();
        for close in closers {
            close.notify_one();
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
}

fn is_terminal(status: GameStatus) -> bool {
    matches!(status, GameStatus::WhiteWon | GameStatus::BlackWon | GameStatus::Draw | GameStatus::Aborted)
}

fn end_reason_str(reason: GameEndReason) -> &'static str {
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

fn status_str(status: GameStatus) -> &'static str {
    match status {
        GameStatus::Waiting => "waiting",
        GameStatus::InProgress => "in_progress",
        GameStatus::WhiteWon => "white_won",
        GameStatus::BlackWon => "black_won",
        GameStatus::Draw => "draw",
        GameStatus::Aborted => "aborted",
    }
}

/// Builds the wire `GameState` shape from a session snapshot. Kept free of
/// `Serialize` derives on the domain types themselves, matching the
/// teacher's `to_game_state_json()` style in `ws.rs` of hand-assembling the
/// wire object at the boundary instead of deriving it on the domain type.
fn snapshot_json(snapshot: &GameSnapshot) -> serde_json::Value {
    json!({
        "gameId": snapshot.game_id,
        "fen": snapshot.fen,
        "turn": snapshot.turn,
        "status": status_str(snapshot.status),
        "endReason": snapshot.end_reason.map(end_reason_str),
        "whiteTimeMs": snapshot.white_time_ms,
        "blackTimeMs": snapshot.black_time_ms,
        "moveSequence": snapshot.move_sequence,
        "winner": snapshot.winner,
        "moveCount": snapshot.move_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatingConfig;
    use crate::matchmaking::MatchmakerConfig;
    use crate::storage::memory::{InMemoryGameStore, InMemoryPlayerStore, InMemorySessionStore};
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    fn hub() -> Arc<ConnectionHub> {
        let (manager, _rx) = GameManager::new(
            Arc::new(InMemoryPlayerStore::new()),
            Arc::new(InMemoryGameStore::new()),
            false,
            RatingConfig { default_rating: 1200, k_factor: 32, min_rating: 100, max_rating: 3000 },
        );
        let matchmaker = Matchmaker::new(MatchmakerConfig { default_rating_range: 100, max_rating_range: 400, expansion_interval_ms: 10_000, expansion_amount: 50 });
        ConnectionHub::new(
            Arc::new(manager),
            Arc::new(matchmaker),
            Arc::new(InMemoryPlayerStore::new()),
            Arc::new(InMemorySessionStore::new()),
            ServerConfig::default(),
            SecurityConfig::default(),
            true,
        )
    }

    #[tokio::test]
    async fn connect_round_trips_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        hub().spawn_accept_loop(listener, shutdown_rx);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = format!("{{\"type\":0,\"messageId\":\"abc0123456789def\",\"timestamp\":0}}\n");
        client.write_all(frame.as_bytes()).await.unwrap();

        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf)).await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["inMemory"], true);
    }
}
